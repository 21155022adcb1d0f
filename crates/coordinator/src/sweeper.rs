//! Background expiration sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::UploadCoordinator;

/// Runs [`UploadCoordinator::sweep_expired`] on a fixed interval until
/// cancelled.
pub struct ExpirationSweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirationSweeper {
    /// Spawns the sweep loop on the current tokio runtime, using the
    /// coordinator's configured interval.
    pub fn spawn(coordinator: Arc<UploadCoordinator>) -> Self {
        let interval = coordinator.config().sweep_interval;
        Self::spawn_with_interval(coordinator, interval)
    }

    pub fn spawn_with_interval(coordinator: Arc<UploadCoordinator>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(?interval, "expiration sweeper started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("expiration sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.sweep_expired().await;
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Returns a token that stops the sweeper when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("expiration sweeper task failed: {e}");
        }
    }
}
