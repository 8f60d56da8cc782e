//! Collaborators consumed by the action pipelines.
//!
//! The runtime driver, persistent store, router backend, image metadata
//! service and application are implemented outside this crate; pipelines
//! only see these traits.

use crate::config::ProvisionConfig;
use crate::container::{Container, NetworkInfo, Unit};
use crate::errors::Result;
use crate::progress::SharedProgress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters for materializing a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    /// Container name.
    pub name: String,
    /// Owning application.
    pub app_name: String,
    /// Process the container runs.
    pub process_name: String,
    /// Image to run.
    pub image: String,
    /// Command line.
    pub commands: Vec<String>,
    /// Whether this is a deploy (build) container.
    pub deploy: bool,
    /// Whether the container produces a new image.
    pub building: bool,
    /// Hosts the scheduler may place the container on.
    pub destination_hosts: Vec<String>,
    /// Port exposed by the process.
    pub exposed_port: Option<String>,
}

/// Container runtime driver.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Creates a container, returning its runtime id.
    async fn create(&self, spec: &CreateSpec) -> Result<String>;

    /// Starts a container, using the deploy command variant when asked.
    async fn start(&self, id: &str, deploy: bool) -> Result<()>;

    /// Stops a container, waiting up to `grace_period_secs`.
    async fn stop(&self, id: &str, grace_period_secs: u64) -> Result<()>;

    /// Removes a container.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Reports where the container can be reached.
    async fn network_info(&self, id: &str) -> Result<NetworkInfo>;

    /// Streams container logs into `sink` until it exits.
    ///
    /// Returns the container exit status.
    async fn logs(&self, id: &str, sink: SharedProgress) -> Result<i64>;

    /// Commits a container to `image`, returning the image reference.
    async fn commit(&self, id: &str, image: &str) -> Result<String>;

    /// Removes an image from every node except the one that built it.
    async fn remove_image_ignore_last(&self, image: &str) -> Result<()>;
}

/// Persistent store of container records, keyed by container name.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, container: &Container) -> Result<()>;

    /// Replaces the record stored under `name`.
    async fn update(&self, name: &str, container: &Container) -> Result<()>;

    /// Deletes the record stored under `name`.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Healthcheck parameters understood by routers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterHealthcheck {
    /// Path probed by the router.
    pub path: String,
    /// Expected HTTP status, zero for any.
    pub status: u16,
    /// Expected body fragment, empty for any.
    pub body: String,
}

impl RouterHealthcheck {
    /// Describes the healthcheck for progress output.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut msg = format!("Path: {}", self.path);
        if self.status != 0 {
            msg.push_str(&format!(", Status: {}", self.status));
        }
        if !self.body.is_empty() {
            msg.push_str(&format!(", Body: {}", self.body));
        }
        msg
    }
}

/// Load-balancer router backend.
#[async_trait]
pub trait Router: Send + Sync {
    /// Registers routes for `app`.
    async fn add_routes(&self, app: &str, addresses: &[String]) -> Result<()>;

    /// Unregisters routes for `app`.
    async fn remove_routes(&self, app: &str, addresses: &[String]) -> Result<()>;

    /// Returns the custom healthcheck capability, if supported.
    fn healthcheck(&self) -> Option<&dyn HealthcheckRouter> {
        None
    }
}

/// Routers able to take custom healthcheck parameters.
#[async_trait]
pub trait HealthcheckRouter: Send + Sync {
    /// Sets the healthcheck used for `app`'s backends.
    async fn set_healthcheck(&self, app: &str, healthcheck: &RouterHealthcheck) -> Result<()>;
}

/// Processes declared by an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Process name to command line.
    #[serde(default)]
    pub processes: BTreeMap<String, String>,
}

/// Healthcheck section of the application manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHealthcheck {
    /// Path probed.
    #[serde(default)]
    pub path: String,
    /// Expected status.
    #[serde(default)]
    pub status: u16,
    /// Expected body fragment.
    #[serde(default, rename = "match")]
    pub matches: String,
    /// Whether the router should probe with these parameters.
    #[serde(default)]
    pub use_in_router: bool,
}

impl ManifestHealthcheck {
    /// Converts to router parameters.
    ///
    /// Routers probe `/` unless the manifest opts in.
    #[must_use]
    pub fn to_router(&self) -> RouterHealthcheck {
        if !self.use_in_router {
            return RouterHealthcheck {
                path: "/".to_string(),
                ..RouterHealthcheck::default()
            };
        }
        let path = if self.path.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.path.trim_start_matches('/'))
        };
        RouterHealthcheck {
            path,
            status: self.status,
            body: self.matches.clone(),
        }
    }
}

/// Restart hooks declared in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartHooks {
    /// Commands run before the process starts.
    #[serde(default)]
    pub before: Vec<String>,
    /// Commands run after the unit is bound.
    #[serde(default)]
    pub after: Vec<String>,
}

/// Hook section of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHooks {
    /// Restart hooks.
    #[serde(default)]
    pub restart: RestartHooks,
}

/// Application manifest data attached to an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    /// Healthcheck parameters.
    #[serde(default)]
    pub healthcheck: ManifestHealthcheck,
    /// Lifecycle hooks.
    #[serde(default)]
    pub hooks: ManifestHooks,
}

/// Image metadata service.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Returns the process that receives routed traffic.
    async fn web_process_name(&self, image: &str) -> Result<String>;

    /// Returns the processes declared by the image.
    async fn custom_data(&self, image: &str) -> Result<ImageMetadata>;

    /// Returns the manifest data attached to the image.
    async fn manifest(&self, image: &str) -> Result<AppManifest>;

    /// Returns the image currently deployed for `app`.
    ///
    /// Fails with [`crate::ProvisionError::NoImagesAvailable`] before the
    /// first deploy.
    async fn current_image_name(&self, app: &str) -> Result<String>;

    /// Appends `image` to `app`'s image history.
    async fn append_image_name(&self, app: &str, image: &str) -> Result<()>;

    /// Lists `app`'s images, oldest first.
    async fn list_app_images(&self, app: &str) -> Result<Vec<String>>;

    /// Deletes an image and forgets it from `app`'s history.
    async fn clean_image(&self, app: &str, image: &str) -> Result<()>;
}

/// The application units are bound into.
#[async_trait]
pub trait App: Send + Sync {
    /// Application name.
    fn name(&self) -> &str;

    /// Application platform.
    fn platform(&self) -> &str;

    /// Looks up an environment variable.
    fn env(&self, key: &str) -> Option<String>;

    /// Binds a unit to the application's services.
    async fn bind_unit(&self, unit: &Unit) -> Result<()>;

    /// Unbinds a unit from the application's services.
    async fn unbind_unit(&self, unit: &Unit) -> Result<()>;
}

/// Checks run against freshly bound units.
#[async_trait]
pub trait UnitChecker: Send + Sync {
    /// Runs the HTTP healthcheck against a web unit.
    async fn healthcheck(&self, container: &Container, sink: SharedProgress) -> Result<()>;

    /// Runs restart-after hooks inside a unit.
    async fn run_restart_after_hooks(&self, container: &Container, sink: SharedProgress)
        -> Result<()>;
}

/// The collaborators every pipeline run needs.
#[derive(Clone)]
pub struct Provisioner {
    /// Container runtime.
    pub runtime: Arc<dyn RuntimeDriver>,
    /// Container records.
    pub store: Arc<dyn ContainerStore>,
    /// Image metadata.
    pub images: Arc<dyn ImageService>,
    /// Unit checks.
    pub checker: Arc<dyn UnitChecker>,
    /// Configuration.
    pub config: Arc<ProvisionConfig>,
}

impl Provisioner {
    /// Creates a provisioner from its collaborators.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn RuntimeDriver>,
        store: Arc<dyn ContainerStore>,
        images: Arc<dyn ImageService>,
        checker: Arc<dyn UnitChecker>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            images,
            checker,
            config: Arc::new(config),
        }
    }

    /// Removes the runtime container and its record.
    pub async fn remove_container(&self, container: &Container) -> Result<()> {
        if !container.id.is_empty() {
            self.runtime.remove(&container.id).await?;
        }
        self.store.delete(&container.name).await
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
