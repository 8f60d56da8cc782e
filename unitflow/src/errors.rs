//! Error types for unit provisioning pipelines.
//!
//! Hard failures travel back to the pipeline caller as a single
//! [`ProvisionError`]. Soft failures (compensation, destroy-time cleanup,
//! image pruning) never leave the crate as errors; they are logged.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// The main error type for provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The operation was canceled by a user action.
    #[error("deploy canceled by user action")]
    Cancelled,

    /// A pipeline was executed without any action.
    #[error("pipeline '{0}' has no actions to execute")]
    EmptyPipeline(String),

    /// The container runtime rejected a call.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// The container store rejected a call.
    #[error("container store error: {0}")]
    Store(String),

    /// The router backend rejected a call.
    #[error("router error: {0}")]
    Router(String),

    /// Image metadata could not be read or written.
    #[error("image error: {0}")]
    Image(String),

    /// The application has no deployed image yet.
    #[error("no images available for app")]
    NoImagesAvailable,

    /// Binding a unit into its application failed.
    #[error("unable to bind unit {unit}: {message}")]
    Bind {
        /// The unit name.
        unit: String,
        /// The reason reported by the application.
        message: String,
    },

    /// A unit did not pass its HTTP healthcheck.
    #[error("healthcheck failed for unit {unit}: {message}")]
    Healthcheck {
        /// The unit name.
        unit: String,
        /// The reason reported by the checker.
        message: String,
    },

    /// A restart hook failed inside a unit.
    #[error("restart hook failed for unit {unit}: {message}")]
    Hook {
        /// The unit name.
        unit: String,
        /// The reason reported by the hook runner.
        message: String,
    },

    /// The build container exited with a non-zero status.
    #[error("Exit status {status}")]
    BuildFailed {
        /// The exit status reported by the log stream.
        status: i64,
    },

    /// The requested process cannot be run from the image.
    #[error("invalid process: {0}")]
    InvalidProcess(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// An error raised by a collaborator outside this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProvisionError {
    /// Creates a runtime error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Creates a store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a router error.
    #[must_use]
    pub fn router(message: impl Into<String>) -> Self {
        Self::Router(message.into())
    }

    /// Creates an image error.
    #[must_use]
    pub fn image(message: impl Into<String>) -> Self {
        Self::Image(message.into())
    }

    /// Creates a bind error.
    #[must_use]
    pub fn bind(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Creates a healthcheck error.
    #[must_use]
    pub fn healthcheck(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Healthcheck {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Creates a hook error.
    #[must_use]
    pub fn hook(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Returns true for the cancellation class of errors.
    ///
    /// Cancellation short-circuits the current action and unwinds the
    /// whole pipeline, like any hard failure, but callers usually report it
    /// differently.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
