//! Actions bringing up the new generation of units and tearing down the old.

use super::commands::lean_container_cmds;
use super::{rollback_notice, web_process_name, ChangeUnitsArgs, RunContainerArgs, UnitChange};
use crate::container::{Container, ContainerStatus};
use crate::errors::{ProvisionError, Result};
use crate::flows::run_container_actions;
use crate::pipeline::{fan_out, run_in_containers, Action, RollbackSink};
use crate::progress::pluralize;
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use tracing::error;

/// Starts every requested unit, each through its own run-container pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddUnitsToHost;

impl AddUnitsToHost {
    async fn start_unit(
        args: &ChangeUnitsArgs,
        placeholder: Container,
        sink: RollbackSink,
    ) -> Result<Container> {
        let provisioner = &args.provisioner;
        let (commands, process_name) = lean_container_cmds(
            provisioner.images.as_ref(),
            &provisioner.config,
            args.app.as_ref(),
            &placeholder.process_name,
            &args.image,
        )
        .await?;
        let run_args = RunContainerArgs::new(
            Arc::clone(&args.app),
            provisioner.clone(),
            process_name,
            args.image.clone(),
        )
        .with_commands(commands)
        .with_destination_hosts(args.to_host.clone())
        .with_progress(Arc::clone(&args.progress))
        .with_exposed_port(args.exposed_port.clone())
        .with_cancellation(args.cancellation.clone());

        let stopped = placeholder.status == ContainerStatus::Stopped;
        let container = run_container_actions(stopped)
            .execute(&run_args, placeholder)
            .await?;
        sink.push(container.clone());
        args.progress.write(&format!(
            " ---> Started unit {} [{}]\n",
            container.short_id(),
            container.process_name
        ));
        Ok(container)
    }
}

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for AddUnitsToHost {
    fn name(&self) -> &str {
        "provision-add-units-to-host"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        let mut added: Vec<Container> = args
            .to_add
            .iter()
            .flat_map(|request| {
                (0..request.quantity).map(|_| Container {
                    process_name: request.process_name.clone(),
                    status: request.status,
                    ..Container::default()
                })
            })
            .collect();

        let total = added.len();
        args.progress.write(&format!(
            "\n---- Starting {total} new {} ----\n",
            pluralize("unit", total)
        ));
        let provisioner = &args.provisioner;
        let remove = move |c: Container| {
            async move {
                if let Err(err) = provisioner.remove_container(&c).await {
                    error!(container = %c.id, error = %err, "error removing added container");
                }
            }
            .boxed()
        };
        run_in_containers(
            &mut added,
            provisioner.config.max_workers,
            true,
            |placeholder, sink| Self::start_unit(args, placeholder, sink),
            Some(&remove),
        )
        .await?;

        Ok(UnitChange { added, ..previous })
    }

    async fn backward(&self, args: &ChangeUnitsArgs, result: &UnitChange) {
        let total = result.added.len();
        args.progress.write(&format!(
            "\n---- Destroying {total} created {} ----\n",
            pluralize("unit", total)
        ));
        let mut containers = result.added.clone();
        fan_out(
            &mut containers,
            args.provisioner.config.max_workers,
            true,
            |c, _| async move {
                match args.provisioner.remove_container(&c).await {
                    Ok(()) => args.progress.write(&format!(
                        " ---> Destroyed unit {} [{}]\n",
                        c.short_id(),
                        c.process_name
                    )),
                    Err(err) => {
                        error!(container = %c.id, error = %err, "error removing added container");
                    }
                }
                Ok::<_, ProvisionError>(c)
            },
        )
        .await;
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}

/// Binds the new units, health-checks web units and runs restart hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindAndHealthcheck;

impl BindAndHealthcheck {
    async fn bind_unit(
        args: &ChangeUnitsArgs,
        web_process: &str,
        healthcheck: bool,
        container: Container,
        sink: RollbackSink,
    ) -> Result<Container> {
        args.app.bind_unit(&container.as_unit()).await?;
        sink.push(container.clone());
        let checker = &args.provisioner.checker;
        if healthcheck && container.process_name == web_process {
            checker
                .healthcheck(&container, Arc::clone(&args.progress))
                .await?;
        }
        checker
            .run_restart_after_hooks(&container, Arc::clone(&args.progress))
            .await?;
        args.progress.write(&format!(
            " ---> Bound and checked unit {} [{}]\n",
            container.short_id(),
            container.process_name
        ));
        Ok(container)
    }
}

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for BindAndHealthcheck {
    fn name(&self) -> &str {
        "bind-and-healthcheck"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        let web_process = web_process_name(args.provisioner.images.as_ref(), &args.image).await;
        // Old units already failing means this run is itself a recovery.
        let healthcheck = !args
            .to_remove
            .iter()
            .any(|c| matches!(c.status, ContainerStatus::Error | ContainerStatus::Stopped));

        let mut change = previous;
        let total = change.added.len();
        args.progress.write(&format!(
            "\n---- Binding and checking {total} new {} ----\n",
            pluralize("unit", total)
        ));
        let app = args.app.as_ref();
        let unbind = move |c: Container| {
            async move {
                if let Err(err) = app.unbind_unit(&c.as_unit()).await {
                    error!(container = %c.id, error = %err, "unable to unbind unit");
                }
            }
            .boxed()
        };
        run_in_containers(
            &mut change.added,
            args.provisioner.config.max_workers,
            true,
            |c, sink| Self::bind_unit(args, &web_process, healthcheck, c, sink),
            Some(&unbind),
        )
        .await?;
        Ok(change)
    }

    async fn backward(&self, args: &ChangeUnitsArgs, result: &UnitChange) {
        let total = result.added.len();
        args.progress.write(&format!(
            "\n---- Unbinding {total} created {} ----\n",
            pluralize("unit", total)
        ));
        let mut containers = result.added.clone();
        fan_out(
            &mut containers,
            args.provisioner.config.max_workers,
            true,
            |c, _| async move {
                match args.app.unbind_unit(&c.as_unit()).await {
                    Ok(()) => args.progress.write(&format!(
                        " ---> Removed bind for unit {} [{}]\n",
                        c.short_id(),
                        c.process_name
                    )),
                    Err(err) => error!(container = %c.id, error = %err, "unable to unbind unit"),
                }
                Ok::<_, ProvisionError>(c)
            },
        )
        .await;
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}

/// Removes every old unit, best-effort.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOldUnits;

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for RemoveOldUnits {
    fn name(&self) -> &str {
        "provision-remove-old-units"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        let total = args.to_remove.len();
        args.progress.write(&format!(
            "\n---- Removing {total} old {} ----\n",
            pluralize("unit", total)
        ));
        let mut old = args.to_remove.clone();
        fan_out(
            &mut old,
            args.provisioner.config.max_workers,
            true,
            |c, _| async move {
                if let Err(err) = args.provisioner.remove_container(&c).await {
                    error!(container = %c.id, error = %err, "ignored error trying to remove old container");
                }
                args.progress.write(&format!(
                    " ---> Removed old unit {} [{}]\n",
                    c.short_id(),
                    c.process_name
                ));
                Ok::<_, ProvisionError>(c)
            },
        )
        .await;
        Ok(previous)
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}

/// Unbinds every old unit, best-effort.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnbindOldUnits;

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for UnbindOldUnits {
    fn name(&self) -> &str {
        "provision-unbind-old-units"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        let total = args.to_remove.len();
        args.progress.write(&format!(
            "\n---- Unbinding {total} old {} ----\n",
            pluralize("unit", total)
        ));
        let mut old = args.to_remove.clone();
        fan_out(
            &mut old,
            args.provisioner.config.max_workers,
            true,
            |c, _| async move {
                if let Err(err) = args.app.unbind_unit(&c.as_unit()).await {
                    error!(container = %c.id, error = %err, "ignored error trying to unbind old container");
                }
                args.progress.write(&format!(
                    " ---> Removed bind for old unit {} [{}]\n",
                    c.short_id(),
                    c.process_name
                ));
                Ok::<_, ProvisionError>(c)
            },
        )
        .await;
        Ok(previous)
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}
