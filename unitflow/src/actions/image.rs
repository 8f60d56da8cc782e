//! Image history bookkeeping after a deploy.

use super::{rollback_notice, ChangeUnitsArgs, UnitChange};
use crate::errors::{ProvisionError, Result};
use crate::pipeline::Action;
use async_trait::async_trait;
use tracing::{debug, error, warn};

/// Records the deployed image and prunes images beyond the history size.
///
/// Pruning never fails the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateAppImage;

#[async_trait]
impl Action<ChangeUnitsArgs, UnitChange> for UpdateAppImage {
    fn name(&self) -> &str {
        "update-app-image"
    }

    async fn forward(&self, args: &ChangeUnitsArgs, previous: UnitChange) -> Result<UnitChange> {
        args.cancellation.check().await?;
        let app = args.app.name();
        let images = &args.provisioner.images;

        let current = images.current_image_name(app).await.unwrap_or_default();
        if current != args.image {
            images
                .append_image_name(app, &args.image)
                .await
                .map_err(|err| ProvisionError::Image(format!("unable to save image name: {err}")))?;
        }

        let all = match images.list_app_images(app).await {
            Ok(all) => all,
            Err(err) => {
                error!(app = %app, error = %err, "couldn't list images for cleaning");
                return Ok(previous);
            }
        };
        let keep_from = all
            .len()
            .saturating_sub(args.provisioner.config.image_history_size);
        for (i, image) in all.iter().enumerate() {
            if i >= keep_from {
                if let Err(err) = args.provisioner.runtime.remove_image_ignore_last(image).await {
                    debug!(image = %image, error = %err, "ignored error removing old image");
                }
                continue;
            }
            if let Err(err) = images.clean_image(app, image).await {
                warn!(image = %image, error = %err, "ignored error cleaning old image");
            }
        }
        Ok(previous)
    }

    async fn on_error(&self, args: &ChangeUnitsArgs, error: &ProvisionError) {
        rollback_notice(args, error);
    }
}
