//! End-to-end runs of the provisioning flows over the in-memory fakes.

use super::*;
use crate::actions::UnitRequest;
use crate::cancellation::Cancellation;
use crate::container::{ContainerStatus, NetworkInfo};
use crate::pipeline::{Action, ForEachContainer};
use crate::progress::CollectingProgressSink;
use crate::provision::ImageMetadata;
use crate::testing::{FakeCancelService, FakeRuntime, Harness, LogScript};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Binds one unit into the application.
struct BindUnit;

#[async_trait]
impl Action<RunContainerArgs, Container> for BindUnit {
    fn name(&self) -> &str {
        "bind-unit"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.app.bind_unit(&previous.as_unit()).await?;
        Ok(previous)
    }

    async fn backward(&self, args: &RunContainerArgs, result: &Container) {
        if let Err(err) = args.app.unbind_unit(&result.as_unit()).await {
            tracing::error!(container = %result.id, error = %err, "unable to unbind unit");
        }
    }
}

/// Fails every container it sees.
struct Refuse;

#[async_trait]
impl Action<RunContainerArgs, Container> for Refuse {
    fn name(&self) -> &str {
        "refuse"
    }

    async fn forward(&self, _args: &RunContainerArgs, previous: Container) -> Result<Container> {
        Err(ProvisionError::runtime(format!("refused {}", previous.name)))
    }
}

/// Captures formatted tracing output.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

#[tokio::test]
async fn test_bind_failure_unwinds_start_and_create_for_every_container() {
    let harness = Harness::new();
    let containers: Vec<Container> = (0..3).map(|_| Container::new("myapp", "web")).collect();
    harness.app.faults.fail_on("bind", &containers[1].name);
    let args = harness.run_args("web", "img:v1");

    let pipeline = Pipeline::new("create-start-bind")
        .then(ForEachContainer::new(CreateContainer))
        .then(ForEachContainer::new(StartContainer))
        .then(ForEachContainer::new(BindUnit));
    let err = pipeline.execute(&args, containers.clone()).await.unwrap_err();

    assert!(
        matches!(err, ProvisionError::Bind { ref unit, .. } if unit == &containers[1].name),
        "unexpected error: {err}"
    );
    let ids: Vec<String> = containers
        .iter()
        .map(|c| FakeRuntime::id_for(&c.name))
        .collect();
    assert_eq!(
        sorted(harness.runtime.calls_to("stop")),
        sorted(ids.iter().map(|id| format!("{id} 10")).collect())
    );
    assert_eq!(sorted(harness.runtime.calls_to("remove")), sorted(ids));
    assert!(harness.runtime.live().is_empty());
    assert!(harness.app.bound().is_empty());
}

#[tokio::test]
async fn test_failed_unbind_is_logged_and_unwinding_continues() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish(),
    );
    let harness = Harness::new();
    let containers: Vec<Container> = (0..2).map(|_| Container::new("myapp", "web")).collect();
    harness.app.faults.fail_on("unbind", &containers[0].name);
    let args = harness.run_args("web", "img:v1");

    let pipeline = Pipeline::new("bind-then-refuse")
        .then(ForEachContainer::new(CreateContainer))
        .then(ForEachContainer::new(BindUnit))
        .then(ForEachContainer::new(Refuse));
    let err = pipeline.execute(&args, containers.clone()).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Runtime(_)));
    assert!(logs.contents().contains("unable to unbind unit"));
    assert!(logs
        .contents()
        .contains(&format!("unbind failed for {}", containers[0].name)));
    assert_eq!(harness.app.bound(), vec![containers[0].name.clone()]);
    assert!(harness.runtime.live().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_build_stops_following_logs() {
    let harness = Harness::new();
    harness
        .runtime
        .set_logs(LogScript::lines(&["---> Installing dependencies"]).lasting(Duration::from_secs(10)));
    let service = Arc::new(FakeCancelService::after(Duration::from_secs(2)));
    let args = harness
        .run_args("web", "img:base")
        .for_deploy("img:v2")
        .with_cancellation(Cancellation::with_service(service.clone()));

    let start = tokio::time::Instant::now();
    let err = build_image(&args).await.unwrap_err();

    assert!(err.is_cancellation());
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(harness.runtime.calls_to("commit").is_empty());
    assert!(harness.runtime.live().is_empty());
    assert!(harness.store.is_empty());
    assert!(service.acks() >= 3);
}

#[tokio::test]
async fn test_build_commits_new_image() {
    let harness = Harness::new();
    harness.runtime.set_logs(LogScript::lines(&["build ok"]));
    let args = harness
        .run_args("web", "img:base")
        .for_deploy("img:v2")
        .with_commands(vec!["/bin/sh".into(), "-lc".into(), "deploy".into()]);

    let built = build_image(&args).await.unwrap();

    assert_eq!(built.image, "img:v2");
    assert_eq!(built.status, ContainerStatus::Building);
    assert_eq!(
        harness.runtime.calls_to("start"),
        vec![format!("{} deploy", built.id)]
    );
    assert!(harness.runtime.last_spec().unwrap().building);
    assert!(!harness.runtime.exists(&built.id));
}

#[tokio::test]
async fn test_build_requires_deploy_arguments() {
    let harness = Harness::new();

    let err = build_image(&harness.run_args("web", "img:base"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Config(_)));
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_swallows_route_removal_failure() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish(),
    );
    let harness = Harness::new();
    harness.images.set_current("img:v1");
    harness.router.faults.fail("remove");
    let old = vec![
        harness.running_container("web"),
        harness.running_container("web"),
    ];
    harness.app.mark_bound(&old[0].name);
    harness.app.mark_bound(&old[1].name);
    let args = harness
        .change_units_args("img:v1")
        .with_units_to_remove(old.clone());

    destroy_units(&args).await.unwrap();

    assert!(logs
        .contents()
        .contains("ignored error during remove routes in app destroy"));
    assert!(logs.contents().contains("remove failed for myapp"));
    assert!(harness.router.calls_to("add").is_empty());
    assert!(harness.runtime.live().is_empty());
    assert!(harness.store.is_empty());
    assert!(harness.app.bound().is_empty());
}

#[tokio::test]
async fn test_unit_without_valid_address_gets_no_route() {
    let harness = Harness::new();
    harness.runtime.set_network(NetworkInfo {
        ip: "10.0.0.9".into(),
        host_port: "0".into(),
    });
    let args = harness
        .change_units_args("img:v2")
        .with_units_to_add(vec![UnitRequest::started("web", 1)]);

    let added = change_units(&args).await.unwrap();

    assert_eq!(added.len(), 1);
    assert!(!added[0].routable);
    assert!(harness.router.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_removes_exactly_the_routes_added() {
    let harness = Harness::new();
    harness.images.set_custom_data(
        "img:v2",
        ImageMetadata {
            processes: [
                ("web".to_string(), "gunicorn app:app".to_string()),
                ("worker".to_string(), "celery worker".to_string()),
            ]
            .into_iter()
            .collect(),
        },
    );
    harness.images.faults.fail("append");
    let sink = Arc::new(CollectingProgressSink::new());
    let args = harness
        .change_units_args("img:v2")
        .with_units_to_add(vec![
            UnitRequest::started("web", 2),
            UnitRequest::started("worker", 1),
        ])
        .with_progress(sink.clone());

    let err = change_units(&args).await.unwrap_err();

    assert!(err.to_string().contains("unable to save image name"));
    let added = harness.router.calls_to("add");
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].len(), 2);
    assert_eq!(harness.router.calls_to("remove"), added);
    assert!(harness.router.routes().is_empty());
    assert!(harness.app.bound().is_empty());
    assert!(harness.runtime.live().is_empty());
    assert!(harness.store.is_empty());
    assert!(sink.contains("**** ROLLING BACK AFTER FAILURE ****"));
    assert!(sink.contains("---- Removing routes from created units ----"));
    assert!(sink.contains("---- Unbinding 3 created units ----"));
    assert!(sink.contains("---- Destroying 3 created units ----"));
}

#[tokio::test]
async fn test_change_units_replaces_old_generation() {
    let harness = Harness::new();
    harness.images.set_current("img:v1");
    let old = vec![
        harness.running_container("web"),
        harness.running_container("web"),
    ];
    harness
        .router
        .seed(&old.iter().map(Container::address).collect::<Vec<_>>());
    for c in &old {
        harness.app.mark_bound(&c.name);
    }
    let sink = Arc::new(CollectingProgressSink::new());
    let args = harness
        .change_units_args("img:v2")
        .with_units_to_add(vec![UnitRequest::started("web", 2)])
        .with_units_to_remove(old.clone())
        .with_progress(sink.clone());

    let added = change_units(&args).await.unwrap();

    assert_eq!(added.len(), 2);
    assert!(added.iter().all(|c| c.routable && c.status == ContainerStatus::Started));
    assert_eq!(
        harness.router.routes(),
        sorted(added.iter().map(Container::address).collect())
    );
    assert_eq!(
        harness.app.bound(),
        sorted(added.iter().map(|c| c.name.clone()).collect())
    );
    for c in &old {
        assert!(!harness.runtime.exists(&c.id));
        assert!(harness.store.get(&c.name).is_none());
    }
    assert_eq!(harness.images.history(), vec!["img:v1", "img:v2"]);
    assert_eq!(harness.checker.healthchecked().len(), 2);

    let headers: Vec<String> = sink
        .lines()
        .into_iter()
        .filter(|l| l.starts_with("----"))
        .collect();
    assert_eq!(
        headers,
        vec![
            "---- Starting 2 new units ----",
            "---- Binding and checking 2 new units ----",
            "---- Adding routes to new units ----",
            "---- Removing routes from old units ----",
            "---- Removing 2 old units ----",
            "---- Unbinding 2 old units ----",
        ]
    );
}

#[tokio::test]
async fn test_failed_old_route_removal_restores_everything() {
    let harness = Harness::new();
    harness.images.set_current("img:v1");
    let old = harness.running_container("web");
    harness.router.seed(&[old.address()]);
    harness.app.mark_bound(&old.name);
    let args = harness
        .change_units_args("img:v2")
        .with_units_to_add(vec![UnitRequest::started("web", 1)])
        .with_units_to_remove(vec![old.clone()]);
    // The first removal is the old generation's; the rollback's must work.
    harness.router.faults.fail_nth("remove", 1);

    let err = change_units(&args).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Router(_)));
    assert_eq!(harness.router.routes(), vec![old.address()]);
    assert_eq!(harness.app.bound(), vec![old.name.clone()]);
    assert_eq!(harness.runtime.live(), vec![old.id.clone()]);
    assert_eq!(harness.images.history(), vec!["img:v1"]);
}

#[tokio::test]
async fn test_stopped_units_are_not_started() {
    let harness = Harness::new();
    let args = harness
        .change_units_args("img:v2")
        .with_units_to_add(vec![UnitRequest::stopped("web", 1)]);

    let added = change_units(&args).await.unwrap();

    assert_eq!(added[0].status, ContainerStatus::Stopped);
    assert!(harness.runtime.calls_to("start").is_empty());
    assert_eq!(
        harness.store.get(&added[0].name).unwrap().status,
        ContainerStatus::Stopped
    );
}
