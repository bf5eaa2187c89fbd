//! Persistence layer for the execution queue
//!
//! This module provides:
//! - [`ExecutionQueueStore`] trait for the queue state machine
//! - [`InMemoryExecutionQueueStore`] for testing
//! - [`PostgresExecutionQueueStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryExecutionQueueStore;
pub use postgres::PostgresExecutionQueueStore;
pub use store::{
    ExecutionQueueStore, FailureOutcome, NewQueueItem, QueueItem, QueueStatus, StoreError,
    WorkspaceScope, CLAIM_EXPIRED,
};
