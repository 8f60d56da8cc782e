//! Linear pipeline execution with backward compensation.

use super::Action;
use crate::errors::{ProvisionError, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// An ordered chain of actions executed as a single logical operation.
///
/// A pipeline runs exactly once: [`Pipeline::execute`] consumes it.
pub struct Pipeline<A, R> {
    name: String,
    actions: Vec<Box<dyn Action<A, R>>>,
}

impl<A, R> Pipeline<A, R>
where
    A: Send + Sync,
    R: Clone + Send + Sync,
{
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Appends an action.
    #[must_use]
    pub fn then(mut self, action: impl Action<A, R> + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Appends a boxed action.
    pub fn push(&mut self, action: Box<dyn Action<A, R>>) {
        self.actions.push(action);
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if the pipeline has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the action names in execution order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Executes every action in order.
    ///
    /// The first action receives `initial`; each following action receives
    /// its predecessor's result. When action `i` fails, its error hook runs,
    /// then the backward step of actions `i-1..=0` in that order, and the
    /// original error is returned.
    pub async fn execute(self, args: &A, initial: R) -> Result<R> {
        if self.actions.is_empty() {
            return Err(ProvisionError::EmptyPipeline(self.name));
        }

        let start = Instant::now();
        let mut completed: Vec<R> = Vec::with_capacity(self.actions.len());
        let mut previous = initial;

        for (index, action) in self.actions.iter().enumerate() {
            debug!(pipeline = %self.name, action = action.name(), index, "forward");
            match action.forward(args, previous).await {
                Ok(result) => {
                    completed.push(result.clone());
                    previous = result;
                }
                Err(err) => {
                    warn!(
                        pipeline = %self.name,
                        action = action.name(),
                        error = %err,
                        "action failed, rolling back {} completed action(s)",
                        completed.len()
                    );
                    action.on_error(args, &err).await;
                    self.unwind(args, completed).await;
                    return Err(err);
                }
            }
        }

        info!(
            pipeline = %self.name,
            actions = self.actions.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "pipeline completed"
        );
        Ok(previous)
    }

    /// Runs backward steps for completed actions, most recent first.
    async fn unwind(&self, args: &A, completed: Vec<R>) {
        for (index, result) in completed.iter().enumerate().rev() {
            let action = &self.actions[index];
            debug!(pipeline = %self.name, action = action.name(), index, "backward");
            action.backward(args, result).await;
        }
    }
}

impl<A, R> std::fmt::Debug for Pipeline<A, R>
where
    A: Send + Sync,
    R: Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
