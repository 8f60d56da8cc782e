//! The build step of deploy containers.

use super::RunContainerArgs;
use crate::container::Container;
use crate::errors::{ProvisionError, Result};
use crate::pipeline::Action;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// Streams the build logs, then commits the build container to the new
/// image and removes it.
///
/// Cancellation is polled on the configured interval while the logs
/// stream; a cancel wins without waiting for the stream to end. The
/// returned container carries the committed image reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowLogsAndCommit;

#[async_trait]
impl Action<RunContainerArgs, Container> for FollowLogsAndCommit {
    fn name(&self) -> &str {
        "follow-logs-and-commit"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        let mut container = previous;
        let runtime = &args.provisioner.runtime;
        let interval = args.provisioner.config.cancel_poll_interval();

        let logs = tokio::select! {
            err = args.cancellation.watch(interval) => return Err(err),
            logs = runtime.logs(&container.id, Arc::clone(&args.progress)) => logs,
        };
        let status = logs.map_err(|err| {
            error!(container = %container.id, error = %err, "error getting logs for container");
            err
        })?;
        if status != 0 {
            return Err(ProvisionError::BuildFailed { status });
        }

        args.progress.write("\n---- Building application image ----\n");
        let target = args.building_image.as_deref().unwrap_or(&args.image);
        let image = runtime
            .commit(&container.id, target)
            .await
            .map_err(|err| {
                error!(container = %container.id, error = %err, "error committing container");
                err
            })?;
        args.progress.write(" ---> Cleaning up\n");
        if let Err(err) = args.provisioner.remove_container(&container).await {
            warn!(container = %container.id, error = %err, "error removing build container");
        }
        container.image = image;
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::Cancellation;
    use crate::progress::CollectingProgressSink;
    use crate::testing::{Harness, LogScript};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commits_building_image_and_cleans_up() {
        let harness = Harness::new();
        harness.runtime.set_logs(LogScript::lines(&["Step 1/2", "Step 2/2"]));
        let sink = Arc::new(CollectingProgressSink::new());
        let args = harness
            .run_args("web", "img:base")
            .for_deploy("img:v2")
            .with_progress(sink.clone());
        let build = harness.running_container("web");

        let built = FollowLogsAndCommit.forward(&args, build.clone()).await.unwrap();

        assert_eq!(built.image, "img:v2");
        assert_eq!(
            harness.runtime.calls_to("commit"),
            vec![format!("{} img:v2", build.id)]
        );
        assert!(!harness.runtime.exists(&build.id));
        assert!(harness.store.get(&build.name).is_none());
        assert_eq!(
            sink.lines(),
            vec![
                "Step 1/2".to_string(),
                "Step 2/2".to_string(),
                "---- Building application image ----".to_string(),
                " ---> Cleaning up".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_build() {
        let harness = Harness::new();
        harness.runtime.set_logs(LogScript::lines(&["boom"]).exit_status(2));
        let args = harness.run_args("web", "img:base").for_deploy("img:v2");

        let err = FollowLogsAndCommit
            .forward(&args, harness.running_container("web"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Exit status 2");
        assert!(harness.runtime.calls_to("commit").is_empty());
    }

    #[tokio::test]
    async fn test_log_stream_error_is_surfaced() {
        let harness = Harness::new();
        harness.runtime.faults.fail("logs");
        let args = harness.run_args("web", "img:base").for_deploy("img:v2");

        let err = FollowLogsAndCommit
            .forward(&args, harness.running_container("web"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Runtime(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_cancel_interrupts_log_stream() {
        let harness = Harness::new();
        harness
            .runtime
            .set_logs(LogScript::lines(&["compiling"]).lasting(Duration::from_secs(60)));
        let cancellation = Cancellation::none();
        let args = harness
            .run_args("web", "img:base")
            .for_deploy("img:v2")
            .with_cancellation(cancellation.clone());
        let build = harness.running_container("web");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancellation.cancel("user abort");
        });
        let start = tokio::time::Instant::now();
        let err = FollowLogsAndCommit.forward(&args, build).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancellation());
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(harness.runtime.calls_to("commit").is_empty());
    }
}
