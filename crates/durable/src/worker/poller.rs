//! Queue polling with exponential backoff
//!
//! Claims queue items with adaptive polling intervals.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use nodeflow_core::duration_millis;
use tracing::{debug, instrument, trace};

use super::shutdown_requested;
use crate::persistence::{ExecutionQueueStore, QueueItem, StoreError, WorkspaceScope};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when items are available)
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no items found
    pub backoff_multiplier: f64,

    /// Maximum items to claim per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Queue poller with adaptive backoff
///
/// Backs off exponentially while the queue is empty and resets to the
/// minimum interval as soon as a poll claims something.
pub struct QueuePoller {
    store: Arc<dyn ExecutionQueueStore>,
    worker_id: String,
    scope: WorkspaceScope,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueuePoller {
    pub fn new(
        store: Arc<dyn ExecutionQueueStore>,
        worker_id: String,
        scope: WorkspaceScope,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            worker_id,
            scope,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Claim up to `max_items` (capped at the batch size)
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll(&mut self, max_items: usize) -> Result<Vec<QueueItem>, PollerError> {
        if *self.shutdown_rx.borrow() {
            debug!("Poller shutdown requested");
            return Ok(vec![]);
        }

        let batch_size = max_items.min(self.config.batch_size);
        let items = self
            .store
            .claim(&self.worker_id, &self.scope, batch_size)
            .await?;

        if items.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = self.current_interval.as_millis(),
                "No items found, backing off"
            );
        } else {
            self.reset_backoff();
            debug!(count = items.len(), "Claimed items");
        }

        Ok(items)
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_requested(&mut shutdown_rx) => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
