//! # Durable Execution Queue
//!
//! A PostgreSQL-backed hand-off between "workflow triggered" and "dispatched
//! to the orchestrator".
//!
//! ## Features
//!
//! - **Concurrency-safe claiming**: `FOR UPDATE SKIP LOCKED`, so workers never claim the same item or wait on each other
//! - **Bounded retries**: failed dispatches are requeued until the attempt budget is spent
//! - **Stale claim recovery**: items held by a crashed worker are swept back after the claim timeout
//! - **Failure labelling**: orchestrator failures use the same HTTP rules as node failures
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Trigger fires: enqueue                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ExecutionQueueStore                         │
//! │  (PostgreSQL: workflow_execution_queue)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (claims items, starts executions, sweeps stale claims)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Orchestrator                             │
//! │  (external: runs the workflow graph)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use nodeflow_durable::prelude::*;
//!
//! let store = Arc::new(PostgresExecutionQueueStore::new(pool));
//! store.migrate().await?;
//!
//! store
//!     .enqueue(NewQueueItem::new(workspace_id, workflow_definition_id, json!({"entityId": id})))
//!     .await?;
//!
//! let orchestrator = Arc::new(HttpOrchestrator::new("http://localhost:8233")?);
//! let workers = WorkerPool::new(store, orchestrator, WorkerPoolConfig::default());
//! workers.start().await?;
//! ```

pub mod orchestrator;
pub mod persistence;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::orchestrator::{
        HttpOrchestrator, Orchestrator, OrchestratorError, StartExecutionRequest,
        StartExecutionResponse,
    };
    pub use crate::persistence::{
        ExecutionQueueStore, FailureOutcome, InMemoryExecutionQueueStore, NewQueueItem,
        PostgresExecutionQueueStore, QueueItem, QueueStatus, StoreError, WorkspaceScope,
    };
    pub use crate::worker::{
        DispatchOutcome, DispatchSummary, PollerConfig, WorkerPool, WorkerPoolConfig,
        WorkerPoolError, WorkerPoolStatus,
    };
}

// Re-export key types at crate root
pub use orchestrator::{HttpOrchestrator, Orchestrator, OrchestratorError};
pub use persistence::{
    ExecutionQueueStore, FailureOutcome, InMemoryExecutionQueueStore, NewQueueItem,
    PostgresExecutionQueueStore, QueueItem, QueueStatus, StoreError, WorkspaceScope,
};
pub use worker::{
    PollerConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus,
    MAX_CLAIM_TIMEOUT,
};
