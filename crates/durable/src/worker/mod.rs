//! Dispatch worker
//!
//! This module provides:
//! - [`WorkerPool`] - claims queue items and dispatches them concurrently
//! - [`QueuePoller`] - claiming with exponential backoff while idle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────┐                   ┌─────────────────────┐  │
//! │  │ QueuePoller │                   │  Stale Reclaimer    │  │
//! │  │  (backoff)  │                   │     (60s)           │  │
//! │  └──────┬──────┘                   └─────────────────────┘  │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Dispatch (Semaphore-limited, timed)          │    │
//! │  │  [Item 1] [Item 2] [Item 3] ... [Item N]            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │   Orchestrator: DISPATCHED | requeue | FAILED               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;

use tokio::sync::watch;

pub use poller::{PollerConfig, PollerError, QueuePoller};
pub use pool::{
    DispatchOutcome, DispatchSummary, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus, MAX_CLAIM_TIMEOUT,
};

/// Resolves once the shutdown flag is set or its sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
