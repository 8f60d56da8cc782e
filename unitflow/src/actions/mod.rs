//! Concrete actions for the unit provisioning pipelines.
//!
//! Two argument bundles exist, one per pipeline flavor:
//! - [`RunContainerArgs`] drives a single container from record to running
//!   (or built) unit, threading a [`Container`]
//! - [`ChangeUnitsArgs`] drives a generation change of an application's
//!   units, threading a [`UnitChange`]

mod build;
pub mod commands;
mod container;
mod image;
mod routes;
mod units;

pub use build::FollowLogsAndCommit;
pub use container::{
    CreateContainer, InsertContainer, SetContainerId, SetNetworkInfo, StartContainer,
    StopContainer, UpdateContainerInStore,
};
pub use image::UpdateAppImage;
pub use routes::{AddNewRoutes, RemoveOldRoutes, SetRouterHealthcheck};
pub use units::{AddUnitsToHost, BindAndHealthcheck, RemoveOldUnits, UnbindOldUnits};

use crate::cancellation::Cancellation;
use crate::container::{Container, ContainerStatus};
use crate::errors::ProvisionError;
use crate::progress::{self, SharedProgress};
use crate::provision::{App, ImageService, Provisioner, Router};
use std::sync::Arc;
use tracing::warn;

/// Arguments shared by every action of one run-container pipeline.
#[derive(Clone)]
pub struct RunContainerArgs {
    /// Application owning the container.
    pub app: Arc<dyn App>,
    /// Process the container runs.
    pub process_name: String,
    /// Image to run.
    pub image: String,
    /// Container command line.
    pub commands: Vec<String>,
    /// Hosts the container may be placed on.
    pub destination_hosts: Vec<String>,
    /// Progress output.
    pub progress: SharedProgress,
    /// Whether the container is a deploy (build) container.
    pub is_deploy: bool,
    /// Image the build produces.
    pub building_image: Option<String>,
    /// Port exposed by the process.
    pub exposed_port: Option<String>,
    /// Cancellation handle.
    pub cancellation: Cancellation,
    /// Collaborators.
    pub provisioner: Provisioner,
}

impl RunContainerArgs {
    /// Creates arguments for running `process_name` of `app` from `image`.
    #[must_use]
    pub fn new(
        app: Arc<dyn App>,
        provisioner: Provisioner,
        process_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            app,
            process_name: process_name.into(),
            image: image.into(),
            commands: Vec::new(),
            destination_hosts: Vec::new(),
            progress: progress::discard(),
            is_deploy: false,
            building_image: None,
            exposed_port: None,
            cancellation: Cancellation::none(),
            provisioner,
        }
    }

    /// Sets the container command line.
    #[must_use]
    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    /// Restricts placement to `hosts`.
    #[must_use]
    pub fn with_destination_hosts(mut self, hosts: Vec<String>) -> Self {
        self.destination_hosts = hosts;
        self
    }

    /// Sets the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Marks the run as a build producing `building_image`.
    #[must_use]
    pub fn for_deploy(mut self, building_image: impl Into<String>) -> Self {
        self.is_deploy = true;
        self.building_image = Some(building_image.into());
        self
    }

    /// Sets the exposed port.
    #[must_use]
    pub fn with_exposed_port(mut self, port: Option<String>) -> Self {
        self.exposed_port = port;
        self
    }

    /// Sets the cancellation handle.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl std::fmt::Debug for RunContainerArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContainerArgs")
            .field("app", &self.app.name())
            .field("process_name", &self.process_name)
            .field("image", &self.image)
            .field("is_deploy", &self.is_deploy)
            .field("building_image", &self.building_image)
            .finish_non_exhaustive()
    }
}

/// Units to start for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    /// Process name; empty selects the image's only process.
    pub process_name: String,
    /// Number of units.
    pub quantity: usize,
    /// Status the units are left in: `Started` or `Stopped`.
    pub status: ContainerStatus,
}

impl UnitRequest {
    /// Requests `quantity` running units of `process_name`.
    #[must_use]
    pub fn started(process_name: impl Into<String>, quantity: usize) -> Self {
        Self {
            process_name: process_name.into(),
            quantity,
            status: ContainerStatus::Started,
        }
    }

    /// Requests `quantity` stopped units of `process_name`.
    #[must_use]
    pub fn stopped(process_name: impl Into<String>, quantity: usize) -> Self {
        Self {
            status: ContainerStatus::Stopped,
            ..Self::started(process_name, quantity)
        }
    }
}

/// Arguments shared by every action of one change-units pipeline.
#[derive(Clone)]
pub struct ChangeUnitsArgs {
    /// Application being changed.
    pub app: Arc<dyn App>,
    /// Router serving the application.
    pub router: Arc<dyn Router>,
    /// Progress output.
    pub progress: SharedProgress,
    /// Units to add.
    pub to_add: Vec<UnitRequest>,
    /// Outgoing generation.
    pub to_remove: Vec<Container>,
    /// Hosts new units may be placed on.
    pub to_host: Vec<String>,
    /// Image of the new generation.
    pub image: String,
    /// Whether the run is part of destroying the application.
    pub app_destroy: bool,
    /// Port exposed by the processes.
    pub exposed_port: Option<String>,
    /// Cancellation handle.
    pub cancellation: Cancellation,
    /// Collaborators.
    pub provisioner: Provisioner,
}

impl ChangeUnitsArgs {
    /// Creates arguments for moving `app` to `image`.
    #[must_use]
    pub fn new(
        app: Arc<dyn App>,
        router: Arc<dyn Router>,
        provisioner: Provisioner,
        image: impl Into<String>,
    ) -> Self {
        Self {
            app,
            router,
            progress: progress::discard(),
            to_add: Vec::new(),
            to_remove: Vec::new(),
            to_host: Vec::new(),
            image: image.into(),
            app_destroy: false,
            exposed_port: None,
            cancellation: Cancellation::none(),
            provisioner,
        }
    }

    /// Sets the units to add.
    #[must_use]
    pub fn with_units_to_add(mut self, to_add: Vec<UnitRequest>) -> Self {
        self.to_add = to_add;
        self
    }

    /// Sets the outgoing generation.
    #[must_use]
    pub fn with_units_to_remove(mut self, to_remove: Vec<Container>) -> Self {
        self.to_remove = to_remove;
        self
    }

    /// Restricts placement of new units to `hosts`.
    #[must_use]
    pub fn with_destination_hosts(mut self, hosts: Vec<String>) -> Self {
        self.to_host = hosts;
        self
    }

    /// Sets the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Marks the run as part of destroying the application.
    #[must_use]
    pub fn for_app_destroy(mut self) -> Self {
        self.app_destroy = true;
        self
    }

    /// Sets the exposed port.
    #[must_use]
    pub fn with_exposed_port(mut self, port: Option<String>) -> Self {
        self.exposed_port = port;
        self
    }

    /// Sets the cancellation handle.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

impl std::fmt::Debug for ChangeUnitsArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeUnitsArgs")
            .field("app", &self.app.name())
            .field("image", &self.image)
            .field("to_add", &self.to_add)
            .field("to_remove", &self.to_remove.len())
            .field("app_destroy", &self.app_destroy)
            .finish_non_exhaustive()
    }
}

/// Result threaded through a change-units pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitChange {
    /// The new generation, as far as it has been brought up.
    pub added: Vec<Container>,
    /// Old units whose routes were removed.
    pub removed_routes: Vec<Container>,
}

/// Resolves the web process of `image`, falling back to no web process.
pub(crate) async fn web_process_name(images: &dyn ImageService, image: &str) -> String {
    match images.web_process_name(image).await {
        Ok(name) => name,
        Err(err) => {
            warn!(image = %image, error = %err, "cannot get the name of the web process");
            String::new()
        }
    }
}

/// Writes the rollback banner before compensations run.
pub(crate) fn rollback_notice(args: &ChangeUnitsArgs, err: &ProvisionError) {
    args.progress.write(&format!(
        "\n**** ROLLING BACK AFTER FAILURE ****\n ---> {err} <---\n"
    ));
}
