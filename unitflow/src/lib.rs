//! # Unitflow
//!
//! Compensable action pipelines for deploying and scaling the container
//! units of an application.
//!
//! Unitflow provides:
//!
//! - **Linear pipelines**: ordered actions threading a typed result, with
//!   backward compensation in reverse order when a step fails
//! - **Container fan-out**: bounded parallel work over a batch, undoing the
//!   containers that succeeded when any of them fails
//! - **Provisioning flows**: run a unit, build an image, replace a
//!   generation of units and tear an application down
//! - **Cancellation**: user cancels polled at every action and while build
//!   logs stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use unitflow::prelude::*;
//!
//! let provisioner = Provisioner::new(runtime, store, images, checker, config);
//! let args = ChangeUnitsArgs::new(app, router, provisioner, "registry/myapp:v2")
//!     .with_units_to_add(vec![UnitRequest::started("web", 3)])
//!     .with_units_to_remove(old_units);
//!
//! let new_units = change_units(&args).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod cancellation;
pub mod config;
pub mod container;
pub mod errors;
pub mod flows;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod provision;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{ChangeUnitsArgs, RunContainerArgs, UnitChange, UnitRequest};
    pub use crate::cancellation::{CancelService, Cancellation, CancellationToken};
    pub use crate::config::ProvisionConfig;
    pub use crate::container::{Container, ContainerStatus, NetworkInfo, Unit};
    pub use crate::errors::{ProvisionError, Result};
    pub use crate::flows::{build_image, change_units, destroy_units, run_container};
    pub use crate::pipeline::{Action, ForEachContainer, Pipeline};
    pub use crate::progress::{
        CollectingProgressSink, LoggingProgressSink, NoOpProgressSink, ProgressSink,
        SharedProgress,
    };
    pub use crate::provision::{
        App, ContainerStore, ImageService, Provisioner, Router, RuntimeDriver, UnitChecker,
    };
}

pub use errors::{ProvisionError, Result};
pub use pipeline::{Action, Pipeline};
