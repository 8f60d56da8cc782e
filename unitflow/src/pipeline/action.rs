//! The action trait.

use crate::errors::{ProvisionError, Result};
use async_trait::async_trait;

/// A named, compensable unit of work.
///
/// `A` is the read-only argument bundle shared by every action of one
/// pipeline run and `R` the result threaded from one action to the next.
#[async_trait]
pub trait Action<A, R>: Send + Sync
where
    A: Send + Sync,
    R: Send + Sync,
{
    /// Returns the name of the action.
    fn name(&self) -> &str;

    /// Runs the action on the previous action's result.
    async fn forward(&self, args: &A, previous: R) -> Result<R>;

    /// Undoes a successful forward, given the result it produced.
    ///
    /// Only called when a later action of the same run fails. Must not
    /// fail: anything that goes wrong is logged.
    async fn backward(&self, _args: &A, _result: &R) {}

    /// Observes the error when this action's forward fails.
    async fn on_error(&self, _args: &A, _error: &ProvisionError) {}
}
