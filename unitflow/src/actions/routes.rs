//! Router actions: routes for the new and old generations and the router
//! healthcheck.

use super::{rollback_notice, web_process_name, ChangeUnitsArgs, UnitChange};
use crate::container::Container;
use crate::errors::{ProvisionError, Result};
use crate::pipeline::Action;
use crate::provision::AppManifest;
use async_trait::async_trait;
use tracing::{error, warn};

fn addresses<'a>(containers: impl IntoIterator<Item = &'a Container>) -> Vec<String> {
    containers.into_iter().map(Container::address).collect()
}

/// Registers routes for the new web units.
///
/// Units are marked routable only once the whole batch is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddNewRoutes;

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for AddNewRoutes {
    fn name(&self) -> &str {
        "add-new-routes"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        let web_process = web_process_name(args.provisioner.images.as_ref(), &args.image).await;
        let mut change = previous;
        if !change.added.is_empty() {
            args.progress.write("\n---- Adding routes to new units ----\n");
        }

        let candidates: Vec<usize> = change
            .added
            .iter()
            .enumerate()
            .filter(|(_, c)| c.process_name == web_process && c.valid_addr())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return Ok(change);
        }

        let routes = addresses(candidates.iter().map(|&i| &change.added[i]));
        if let Err(err) = args.router.add_routes(args.app.name(), &routes).await {
            if let Err(cleanup) = args.router.remove_routes(args.app.name(), &routes).await {
                warn!(app = %args.app.name(), error = %cleanup, "error cleaning up partially added routes");
            }
            return Err(err);
        }
        for i in candidates {
            let container = &mut change.added[i];
            container.routable = true;
            args.progress.write(&format!(
                " ---> Added route to unit {} [{}]\n",
                container.short_id(),
                container.process_name
            ));
        }
        Ok(change)
    }

    async fn backward(&self, args: &ChangeUnitsArgs, result: &UnitChange) {
        args.progress
            .write("\n---- Removing routes from created units ----\n");
        let routable: Vec<&Container> = result.added.iter().filter(|c| c.routable).collect();
        if routable.is_empty() {
            return;
        }
        let routes = addresses(routable.iter().copied());
        if let Err(err) = args.router.remove_routes(args.app.name(), &routes).await {
            error!(routes = ?routes, error = %err, "error removing routes of created units");
            return;
        }
        for c in routable {
            args.progress.write(&format!(
                " ---> Removed route from unit {} [{}]\n",
                c.short_id(),
                c.process_name
            ));
        }
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}

/// Pushes the new image's healthcheck to routers that support it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetRouterHealthcheck;

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for SetRouterHealthcheck {
    fn name(&self) -> &str {
        "set-router-healthcheck"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        let Some(router) = args.router.healthcheck() else {
            return Ok(previous);
        };
        let manifest = args.provisioner.images.manifest(&args.image).await?;
        let healthcheck = manifest.healthcheck.to_router();
        args.progress.write(&format!(
            "\n---- Setting router healthcheck ({}) ----\n",
            healthcheck.describe()
        ));
        router
            .set_healthcheck(args.app.name(), &healthcheck)
            .await?;
        Ok(previous)
    }

    /// Restores the healthcheck of the image currently deployed.
    async fn backward(&self, args: &ChangeUnitsArgs, _result: &UnitChange) {
        let Some(router) = args.router.healthcheck() else {
            return;
        };
        let images = &args.provisioner.images;
        let current = images
            .current_image_name(args.app.name())
            .await
            .unwrap_or_default();
        let manifest = match images.manifest(&current).await {
            Ok(manifest) => manifest,
            Err(err) => {
                error!(image = %current, error = %err, "error getting manifest of current image");
                AppManifest::default()
            }
        };
        if let Err(err) = router
            .set_healthcheck(args.app.name(), &manifest.healthcheck.to_router())
            .await
        {
            error!(app = %args.app.name(), error = %err, "error restoring router healthcheck");
        }
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}

/// Unregisters routes of the outgoing web units.
///
/// During application destruction failures are logged and swallowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOldRoutes;

impl RemoveOldRoutes {
    async fn remove_routes(args: &ChangeUnitsArgs) -> Result<Vec<Container>> {
        if !args.to_remove.is_empty() {
            args.progress.write("\n---- Removing routes from old units ----\n");
        }
        let images = args.provisioner.images.as_ref();
        let current = match images.current_image_name(args.app.name()).await {
            Ok(image) => image,
            Err(ProvisionError::NoImagesAvailable) => String::new(),
            Err(err) => return Err(err),
        };
        let web_process = web_process_name(images, &current).await;

        let mut candidates: Vec<Container> = args
            .to_remove
            .iter()
            .filter(|c| c.process_name == web_process && c.valid_addr())
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let routes = addresses(&candidates);
        if let Err(err) = args.router.remove_routes(args.app.name(), &routes).await {
            if !args.app_destroy {
                if let Err(readd) = args.router.add_routes(args.app.name(), &routes).await {
                    warn!(app = %args.app.name(), error = %readd, "error adding back routes after failed removal");
                }
            }
            return Err(err);
        }
        for c in &mut candidates {
            c.routable = true;
            args.progress.write(&format!(
                " ---> Removed route from unit {} [{}]\n",
                c.short_id(),
                c.process_name
            ));
        }
        Ok(candidates)
    }
}

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for RemoveOldRoutes {
    fn name(&self) -> &str {
        "remove-old-routes"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        match Self::remove_routes(args).await {
            Ok(removed_routes) => Ok(UnitChange {
                removed_routes,
                ..previous
            }),
            Err(err) if args.app_destroy => {
                error!(app = %args.app.name(), error = %err, "ignored error during remove routes in app destroy");
                Ok(previous)
            }
            Err(err) => Err(err),
        }
    }

    async fn backward(&self, args: &ChangeUnitsArgs, result: &UnitChange) {
        args.progress.write("\n---- Adding back routes to old units ----\n");
        if result.removed_routes.is_empty() {
            return;
        }
        let routes = addresses(&result.removed_routes);
        if let Err(err) = args.router.add_routes(args.app.name(), &routes).await {
            error!(routes = ?routes, error = %err, "error adding back routes of old units");
            return;
        }
        for c in &result.removed_routes {
            args.progress.write(&format!(
                " ---> Added route to unit {} [{}]\n",
                c.short_id(),
                c.process_name
            ));
        }
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}
