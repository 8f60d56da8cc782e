//! Fan-out of a per-container operation over a batch.
//!
//! The batch is split into contiguous chunks, one per worker. Inside a chunk
//! containers are processed in slice order and the first failure stops that
//! chunk only. Every successful callback may push the container it produced
//! onto the rollback sink; both the error and rollback channels are sized to
//! the batch, so a writer never waits on a reader.
//!
//! Chunks borrow their slice of the batch, so parallel chunks are polled
//! concurrently on the caller's task rather than spawned.

use super::Action;
use crate::container::Container;
use crate::errors::{ProvisionError, Result};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::error;

/// Compensation applied to each container recorded on the rollback sink.
pub type RollbackFn<'r> = dyn Fn(Container) -> BoxFuture<'r, ()> + Send + Sync + 'r;

/// Records containers that must be undone if the batch fails.
#[derive(Debug, Clone)]
pub struct RollbackSink {
    tx: mpsc::Sender<Container>,
}

impl RollbackSink {
    /// Records a container for rollback.
    pub fn push(&self, container: Container) {
        if let Err(err) = self.tx.try_send(container) {
            error!(error = %err, "rollback sink rejected container");
        }
    }

    /// Returns the number of slots the sink was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Outcome of a fan-out run.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Failures by container index, sorted by index.
    pub failures: Vec<(usize, ProvisionError)>,
    /// Containers pushed onto the rollback sink.
    pub to_rollback: Vec<Container>,
}

impl FanOutReport {
    /// Returns true when no callback failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the failure with the lowest container index.
    #[must_use]
    pub fn into_first_failure(self) -> (Option<ProvisionError>, Vec<Container>) {
        let first = self.failures.into_iter().next().map(|(_, err)| err);
        (first, self.to_rollback)
    }
}

/// Returns the number of workers used for a batch.
///
/// Zero configured workers means one worker per container.
#[must_use]
pub fn worker_count(max_workers: usize, containers: usize) -> usize {
    if max_workers == 0 {
        containers.max(1)
    } else {
        max_workers.min(containers.max(1))
    }
}

/// Runs `callback` over every container and reports all outcomes.
///
/// Each successful callback's returned container replaces the slot it was
/// called with. With `parallel` false, chunks run one after another and
/// the run stops at the first failing chunk.
pub async fn fan_out<F, Fut>(
    containers: &mut [Container],
    max_workers: usize,
    parallel: bool,
    callback: F,
) -> FanOutReport
where
    F: Fn(Container, RollbackSink) -> Fut + Sync,
    Fut: Future<Output = Result<Container>> + Send,
{
    let total = containers.len();
    if total == 0 {
        return FanOutReport::default();
    }
    let step = total.div_ceil(worker_count(max_workers, total));

    let (err_tx, mut err_rx) = mpsc::channel::<(usize, ProvisionError)>(total);
    let (rollback_tx, mut rollback_rx) = mpsc::channel::<Container>(total);

    {
        let callback = &callback;
        let chunks = containers.chunks_mut(step).enumerate().map(|(n, chunk)| {
            run_chunk(
                n * step,
                chunk,
                callback,
                err_tx.clone(),
                RollbackSink {
                    tx: rollback_tx.clone(),
                },
            )
        });

        if parallel {
            join_all(chunks).await;
        } else {
            for chunk in chunks {
                if !chunk.await {
                    break;
                }
            }
        }
    }
    drop(err_tx);
    drop(rollback_tx);

    let mut report = FanOutReport::default();
    while let Ok(failure) = err_rx.try_recv() {
        report.failures.push(failure);
    }
    report.failures.sort_by_key(|(index, _)| *index);
    while let Ok(container) = rollback_rx.try_recv() {
        report.to_rollback.push(container);
    }
    report
}

async fn run_chunk<F, Fut>(
    offset: usize,
    chunk: &mut [Container],
    callback: &F,
    errors: mpsc::Sender<(usize, ProvisionError)>,
    sink: RollbackSink,
) -> bool
where
    F: Fn(Container, RollbackSink) -> Fut + Sync,
    Fut: Future<Output = Result<Container>> + Send,
{
    for (i, slot) in chunk.iter_mut().enumerate() {
        match callback(slot.clone(), sink.clone()).await {
            Ok(updated) => *slot = updated,
            Err(err) => {
                if let Err(send_err) = errors.try_send((offset + i, err)) {
                    error!(error = %send_err, "fan-out error channel rejected failure");
                }
                return false;
            }
        }
    }
    true
}

/// Runs `callback` over every container, compensating on failure.
///
/// If any callback fails, `rollback` runs once for every container on the
/// rollback sink and the failure with the lowest container index is
/// returned.
pub async fn run_in_containers<F, Fut>(
    containers: &mut [Container],
    max_workers: usize,
    parallel: bool,
    callback: F,
    rollback: Option<&RollbackFn<'_>>,
) -> Result<()>
where
    F: Fn(Container, RollbackSink) -> Fut + Sync,
    Fut: Future<Output = Result<Container>> + Send,
{
    let (failure, to_rollback) = fan_out(containers, max_workers, parallel, callback)
        .await
        .into_first_failure();
    let Some(err) = failure else {
        return Ok(());
    };
    if let Some(rollback) = rollback {
        for container in to_rollback {
            rollback(container).await;
        }
    }
    Err(err)
}

/// Lifts a per-container action over a batch of containers.
///
/// Forward runs the inner forward on every container; containers whose
/// forward succeeded are compensated with the inner backward when another
/// one fails. Backward runs the inner backward on every container.
pub struct ForEachContainer<A> {
    name: String,
    inner: Box<dyn Action<A, Container>>,
    max_workers: usize,
    parallel: bool,
}

impl<A> ForEachContainer<A>
where
    A: Send + Sync + 'static,
{
    /// Wraps `inner`, running it in parallel with one worker per container.
    #[must_use]
    pub fn new(inner: impl Action<A, Container> + 'static) -> Self {
        Self {
            name: format!("{}-each", inner.name()),
            inner: Box::new(inner),
            max_workers: 0,
            parallel: true,
        }
    }

    /// Caps the number of workers.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Runs chunks one after another.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

#[async_trait]
impl<A> Action<A, Vec<Container>> for ForEachContainer<A>
where
    A: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, args: &A, previous: Vec<Container>) -> Result<Vec<Container>> {
        let inner = self.inner.as_ref();
        let mut containers = previous;
        let undo = move |c: Container| async move { inner.backward(args, &c).await }.boxed();
        run_in_containers(
            &mut containers,
            self.max_workers,
            self.parallel,
            |c, sink| async move {
                let done = inner.forward(args, c).await?;
                sink.push(done.clone());
                Ok::<_, ProvisionError>(done)
            },
            Some(&undo),
        )
        .await?;
        Ok(containers)
    }

    async fn backward(&self, args: &A, result: &Vec<Container>) {
        let inner = self.inner.as_ref();
        let mut containers = result.clone();
        fan_out(&mut containers, self.max_workers, self.parallel, |c, _| async move {
            inner.backward(args, &c).await;
            Ok::<_, ProvisionError>(c)
        })
        .await;
    }

    async fn on_error(&self, args: &A, error: &ProvisionError) {
        self.inner.on_error(args, error).await;
    }
}
