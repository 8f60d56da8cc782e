//! Cooperative cancellation for pipeline runs.
//!
//! This module provides:
//! - [`CancellationToken`] for in-process cancellation
//! - [`CancelService`], the external source that acknowledges user cancels
//! - [`Cancellation`], the handle actions poll at their start and that the
//!   build-log follower watches on an interval

mod token;

pub use token::CancellationToken;

use crate::errors::{ProvisionError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// External signal source for user-requested cancellation.
#[async_trait]
pub trait CancelService: Send + Sync {
    /// Acknowledges a pending cancel request, returning whether one exists.
    async fn ack_cancel(&self) -> Result<bool>;
}

/// Cancellation handle shared by every action of one pipeline run.
///
/// Polling is cooperative: a call already in flight is never interrupted,
/// the cancel takes effect at the next poll point.
#[derive(Clone, Default)]
pub struct Cancellation {
    token: Arc<CancellationToken>,
    service: Option<Arc<dyn CancelService>>,
}

impl Cancellation {
    /// Creates a handle that never reports cancellation on its own.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a handle backed by an external cancel service.
    #[must_use]
    pub fn with_service(service: Arc<dyn CancelService>) -> Self {
        Self {
            token: Arc::new(CancellationToken::new()),
            service: Some(service),
        }
    }

    /// Returns the in-process token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Cancels the run locally.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Polls for cancellation once.
    ///
    /// Failures talking to the cancel service are logged and ignored.
    pub async fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        let Some(service) = &self.service else {
            return Ok(());
        };
        match service.ack_cancel().await {
            Ok(true) => {
                self.token.cancel("canceled by user action");
                Err(ProvisionError::Cancelled)
            }
            Ok(false) => Ok(()),
            Err(err) => {
                error!(error = %err, "unable to check if event should be canceled, ignoring");
                Ok(())
            }
        }
    }

    /// Polls every `interval` until cancellation is observed.
    ///
    /// Local cancels wake the watcher immediately instead of waiting for the
    /// next tick.
    pub async fn watch(&self, interval: Duration) -> ProvisionError {
        loop {
            if let Err(err) = self.check().await {
                return err;
            }
            tokio::select! {
                () = self.token.cancelled() => return ProvisionError::Cancelled,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation")
            .field("token", &self.token)
            .field("has_service", &self.service.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Service {}

        #[async_trait]
        impl CancelService for Service {
            async fn ack_cancel(&self) -> Result<bool>;
        }
    }

    #[tokio::test]
    async fn test_none_never_cancels() {
        assert!(Cancellation::none().check().await.is_ok());
    }

    #[tokio::test]
    async fn test_service_cancel_trips_token() {
        let mut service = MockService::new();
        service.expect_ack_cancel().times(1).returning(|| Ok(true));
        let cancellation = Cancellation::with_service(Arc::new(service));

        let err = cancellation.check().await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(cancellation.token().is_cancelled());

        // The service is not asked again once the token tripped.
        assert!(cancellation.check().await.is_err());
    }

    #[tokio::test]
    async fn test_service_error_is_ignored() {
        let mut service = MockService::new();
        service
            .expect_ack_cancel()
            .returning(|| Err(ProvisionError::Internal("event store down".into())));
        let cancellation = Cancellation::with_service(Arc::new(service));

        assert!(cancellation.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_local_cancel() {
        let cancellation = Cancellation::none();
        cancellation.cancel("operator abort");
        assert!(cancellation.check().await.unwrap_err().is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_polls_on_interval() {
        let mut service = MockService::new();
        let mut polls = 0;
        service.expect_ack_cancel().returning(move || {
            polls += 1;
            Ok(polls >= 3)
        });
        let cancellation = Cancellation::with_service(Arc::new(service));

        let started = tokio::time::Instant::now();
        let err = cancellation.watch(Duration::from_secs(1)).await;

        assert!(err.is_cancellation());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_wakes_on_local_cancel() {
        let cancellation = Cancellation::none();
        let remote = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            remote.cancel("stop");
        });

        let started = tokio::time::Instant::now();
        let err = cancellation.watch(Duration::from_secs(60)).await;

        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
