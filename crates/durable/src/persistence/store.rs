//! ExecutionQueueStore trait definition

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Queue item not found
    #[error("queue item not found: {0}")]
    ItemNotFound(Uuid),

    /// The item is not in a state that allows the requested transition
    #[error("queue item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: QueueStatus,
        to: QueueStatus,
    },

    /// The caller no longer holds the item's claim, e.g. it was swept and
    /// possibly claimed again by another worker
    #[error("worker {worker_id} does not hold the claim on queue item {id}")]
    ClaimNotHeld { id: Uuid, worker_id: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Queue item status
///
/// `PENDING -> CLAIMED -> DISPATCHED`, with `PENDING | CLAIMED -> FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Claimed,
    Dispatched,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Dispatched => "DISPATCHED",
            Self::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "DISPATCHED" => Ok(Self::Dispatched),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown queue status: {other}"
            ))),
        }
    }
}

/// A row of the execution queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub workflow_definition_id: Uuid,
    pub status: QueueStatus,
    pub input: serde_json::Value,
    /// Failed dispatch attempts so far
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    /// Orchestrator execution id, set once dispatched
    pub execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// A queue item to enqueue when a trigger fires
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub workspace_id: Uuid,
    pub workflow_definition_id: Uuid,
    pub input: serde_json::Value,
}

impl NewQueueItem {
    pub fn new(workspace_id: Uuid, workflow_definition_id: Uuid, input: serde_json::Value) -> Self {
        Self {
            workspace_id,
            workflow_definition_id,
            input,
        }
    }
}

/// Workspaces a worker claims items for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "workspace_ids")]
pub enum WorkspaceScope {
    #[default]
    All,
    Only(Vec<Uuid>),
}

impl WorkspaceScope {
    /// Scope for a list of workspace ids; an empty list means every workspace
    pub fn from_ids(ids: Vec<Uuid>) -> Self {
        if ids.is_empty() {
            Self::All
        } else {
            Self::Only(ids)
        }
    }

    pub fn includes(&self, workspace_id: &Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(workspace_id),
        }
    }

    /// Workspace ids to filter on, `None` for every workspace
    pub fn workspace_ids(&self) -> Option<&[Uuid]> {
        match self {
            Self::All => None,
            Self::Only(ids) => Some(ids),
        }
    }
}

/// Outcome of failing a claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Returned to PENDING; `attempt` failed attempts recorded so far
    Requeued { attempt: u32 },

    /// Attempt budget spent, item is FAILED
    Exhausted { attempts: u32 },
}

/// Durable execution queue
///
/// Implementations must be safe for many concurrent workers: a PENDING item
/// is claimed by exactly one worker and claiming never blocks on items held
/// by another worker.
#[async_trait]
pub trait ExecutionQueueStore: Send + Sync + 'static {
    /// Enqueue a new PENDING item
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    /// Claim up to `max_items` PENDING items in `scope`, oldest first
    async fn claim(
        &self,
        worker_id: &str,
        scope: &WorkspaceScope,
        max_items: usize,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// CLAIMED -> DISPATCHED, only while `worker_id` holds the claim
    async fn mark_dispatched(
        &self,
        id: Uuid,
        worker_id: &str,
        execution_id: &str,
    ) -> Result<QueueItem, StoreError>;

    /// Record a failed dispatch of an item claimed by `worker_id`
    ///
    /// Requeues the item unless this failure spends the attempt budget.
    async fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureOutcome, StoreError>;

    /// -> FAILED, regardless of remaining attempts
    ///
    /// With `Some(worker_id)` the item must be CLAIMED by that worker. With
    /// `None` any PENDING or CLAIMED item is failed.
    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        error: &str,
    ) -> Result<QueueItem, StoreError>;

    /// Fail every CLAIMED item claimed more than `claim_timeout` ago
    ///
    /// An expired claim counts as a failed attempt.
    async fn reclaim_stale(
        &self,
        claim_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Vec<(Uuid, FailureOutcome)>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<QueueItem, StoreError>;
}

/// `last_error` recorded when the sweeper reclaims an item
pub const CLAIM_EXPIRED: &str = "claim expired";

/// Whether `worker_id` currently holds the claim on `item`
pub(crate) fn holds_claim(item: &QueueItem, worker_id: &str) -> bool {
    item.status == QueueStatus::Claimed && item.claimed_by.as_deref() == Some(worker_id)
}

/// Error for a transition to `to` that `item` refused
///
/// A worker acting on an item it does not hold gets `ClaimNotHeld`, unless
/// the item already reached a terminal state.
pub(crate) fn rejected_transition(
    item: &QueueItem,
    worker_id: Option<&str>,
    to: QueueStatus,
) -> StoreError {
    match worker_id {
        Some(worker_id) if !item.status.is_terminal() && !holds_claim(item, worker_id) => {
            StoreError::ClaimNotHeld {
                id: item.id,
                worker_id: worker_id.to_string(),
            }
        }
        _ => StoreError::InvalidTransition {
            id: item.id,
            from: item.status,
            to,
        },
    }
}

/// Status an item moves to after a failed attempt
pub(crate) fn status_after_failure(attempts: u32, max_attempts: u32) -> QueueStatus {
    if attempts >= max_attempts {
        QueueStatus::Failed
    } else {
        QueueStatus::Pending
    }
}

pub(crate) fn failure_outcome(status: QueueStatus, attempts: u32) -> FailureOutcome {
    if status == QueueStatus::Failed {
        FailureOutcome::Exhausted { attempts }
    } else {
        FailureOutcome::Requeued { attempt: attempts }
    }
}
