//! A harness wiring every fake into pipeline arguments.

use std::sync::Arc;

use super::mocks::{FakeApp, FakeChecker, FakeImages, FakeRouter, FakeRuntime, MemoryStore};
use crate::actions::{ChangeUnitsArgs, RunContainerArgs};
use crate::config::ProvisionConfig;
use crate::container::{Container, ContainerStatus};
use crate::provision::{App, Provisioner};

/// Fakes for one test, shared with the pipeline arguments it builds.
#[derive(Debug)]
pub struct Harness {
    /// Container runtime.
    pub runtime: Arc<FakeRuntime>,
    /// Container records.
    pub store: Arc<MemoryStore>,
    /// Image metadata.
    pub images: Arc<FakeImages>,
    /// Unit checks.
    pub checker: Arc<FakeChecker>,
    /// The application, named `myapp`.
    pub app: Arc<FakeApp>,
    /// The application's router.
    pub router: Arc<FakeRouter>,
    config: ProvisionConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            runtime: Arc::new(FakeRuntime::new()),
            store: Arc::new(MemoryStore::new()),
            images: Arc::new(FakeImages::new()),
            checker: Arc::new(FakeChecker::new()),
            app: Arc::new(FakeApp::new("myapp")),
            router: Arc::new(FakeRouter::new()),
            config: ProvisionConfig::default(),
        }
    }
}

impl Harness {
    /// Creates a harness with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ProvisionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the router.
    #[must_use]
    pub fn with_router(mut self, router: FakeRouter) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Builds a provisioner over the fakes.
    #[must_use]
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(
            self.runtime.clone(),
            self.store.clone(),
            self.images.clone(),
            self.checker.clone(),
            self.config.clone(),
        )
    }

    /// Builds run-container arguments for `process` from `image`.
    #[must_use]
    pub fn run_args(&self, process: &str, image: &str) -> RunContainerArgs {
        RunContainerArgs::new(self.app.clone(), self.provisioner(), process, image)
    }

    /// Builds change-units arguments moving the app to `image`.
    #[must_use]
    pub fn change_units_args(&self, image: &str) -> ChangeUnitsArgs {
        ChangeUnitsArgs::new(
            self.app.clone(),
            self.router.clone(),
            self.provisioner(),
            image,
        )
    }

    /// Creates a started container known to the runtime and the store.
    pub fn running_container(&self, process: &str) -> Container {
        let mut container =
            Container::new(self.app.name(), process).with_status(ContainerStatus::Started);
        container.id = FakeRuntime::id_for(&container.name);
        container.platform = self.app.platform().to_string();
        container.image = "img:v1".to_string();
        container.set_network_info(self.runtime.next_network());
        self.runtime.register(&container.id);
        self.store.put(container.clone());
        container
    }
}
