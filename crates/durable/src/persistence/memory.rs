//! In-memory implementation of ExecutionQueueStore for testing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::*;

#[derive(Default)]
struct QueueState {
    items: HashMap<Uuid, QueueItem>,
    /// Insertion order, which is `created_at` order
    order: Vec<Uuid>,
}

impl QueueState {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut QueueItem, StoreError> {
        self.items.get_mut(&id).ok_or(StoreError::ItemNotFound(id))
    }
}

/// In-memory implementation of ExecutionQueueStore
///
/// Provides the same semantics as the PostgreSQL implementation. A single
/// mutex stands in for row locks, so claims are serialized.
///
/// # Example
///
/// ```
/// use nodeflow_durable::InMemoryExecutionQueueStore;
///
/// let store = InMemoryExecutionQueueStore::new();
/// assert_eq!(store.pending_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryExecutionQueueStore {
    state: Mutex<QueueState>,
}

impl InMemoryExecutionQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.count(QueueStatus::Pending)
    }

    pub fn count(&self, status: QueueStatus) -> usize {
        self.state
            .lock()
            .items
            .values()
            .filter(|item| item.status == status)
            .count()
    }

    /// All items in creation order
    pub fn items(&self) -> Vec<QueueItem> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect()
    }
}

fn record_failure(item: &mut QueueItem, error: &str, max_attempts: u32) -> FailureOutcome {
    item.attempt_count += 1;
    item.last_error = Some(error.to_string());
    item.status = status_after_failure(item.attempt_count, max_attempts);
    item.claimed_by = None;
    item.claimed_at = None;
    failure_outcome(item.status, item.attempt_count)
}

#[async_trait]
impl ExecutionQueueStore for InMemoryExecutionQueueStore {
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let item = QueueItem {
            id: Uuid::now_v7(),
            workspace_id: item.workspace_id,
            workflow_definition_id: item.workflow_definition_id,
            status: QueueStatus::Pending,
            input: item.input,
            attempt_count: 0,
            last_error: None,
            claimed_by: None,
            execution_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            dispatched_at: None,
        };

        let mut state = self.state.lock();
        state.order.push(item.id);
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn claim(
        &self,
        worker_id: &str,
        scope: &WorkspaceScope,
        max_items: usize,
    ) -> Result<Vec<QueueItem>, StoreError> {
        if max_items == 0 || matches!(scope, WorkspaceScope::Only(ids) if ids.is_empty()) {
            return Ok(vec![]);
        }

        let mut state = self.state.lock();
        let QueueState { items, order } = &mut *state;
        let now = Utc::now();
        let mut claimed = Vec::new();

        for id in order.iter() {
            if claimed.len() >= max_items {
                break;
            }
            let Some(item) = items.get_mut(id) else {
                continue;
            };
            if item.status != QueueStatus::Pending || !scope.includes(&item.workspace_id) {
                continue;
            }
            item.status = QueueStatus::Claimed;
            item.claimed_by = Some(worker_id.to_string());
            item.claimed_at = Some(now);
            claimed.push(item.clone());
        }

        Ok(claimed)
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        worker_id: &str,
        execution_id: &str,
    ) -> Result<QueueItem, StoreError> {
        let mut state = self.state.lock();
        let item = state.get_mut(id)?;
        if !holds_claim(item, worker_id) {
            return Err(rejected_transition(item, Some(worker_id), QueueStatus::Dispatched));
        }
        item.status = QueueStatus::Dispatched;
        item.execution_id = Some(execution_id.to_string());
        item.dispatched_at = Some(Utc::now());
        Ok(item.clone())
    }

    async fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureOutcome, StoreError> {
        let mut state = self.state.lock();
        let item = state.get_mut(id)?;
        if !holds_claim(item, worker_id) {
            return Err(rejected_transition(item, Some(worker_id), QueueStatus::Pending));
        }
        Ok(record_failure(item, error, max_attempts))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        error: &str,
    ) -> Result<QueueItem, StoreError> {
        let mut state = self.state.lock();
        let item = state.get_mut(id)?;
        let allowed = match worker_id {
            Some(worker_id) => holds_claim(item, worker_id),
            None => !item.status.is_terminal(),
        };
        if !allowed {
            return Err(rejected_transition(item, worker_id, QueueStatus::Failed));
        }
        if item.status == QueueStatus::Claimed {
            item.attempt_count += 1;
        }
        item.status = QueueStatus::Failed;
        item.last_error = Some(error.to_string());
        item.claimed_by = None;
        item.claimed_at = None;
        Ok(item.clone())
    }

    async fn reclaim_stale(
        &self,
        claim_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Vec<(Uuid, FailureOutcome)>, StoreError> {
        // a window too large to represent has no stale claims
        let Some(threshold) = chrono::Duration::from_std(claim_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
        else {
            return Ok(vec![]);
        };

        let mut state = self.state.lock();
        let mut reclaimed = Vec::new();
        for item in state.items.values_mut() {
            let expired = item.status == QueueStatus::Claimed
                && item.claimed_at.is_some_and(|claimed_at| claimed_at <= threshold);
            if expired {
                reclaimed.push((item.id, record_failure(item, CLAIM_EXPIRED, max_attempts)));
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, id: Uuid) -> Result<QueueItem, StoreError> {
        self.state
            .lock()
            .items
            .get(&id)
            .cloned()
            .ok_or(StoreError::ItemNotFound(id))
    }
}
