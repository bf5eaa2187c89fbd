//! Dispatch worker against the in-memory queue and a scripted orchestrator

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodeflow_durable::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

/// Orchestrator that replays scripted replies, then accepts everything
#[derive(Default)]
struct ScriptedOrchestrator {
    replies: Mutex<VecDeque<Result<StartExecutionResponse, OrchestratorError>>>,
    requests: Mutex<Vec<StartExecutionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedOrchestrator {
    fn failing_with(statuses: &[u16]) -> Self {
        let replies = statuses
            .iter()
            .map(|status| {
                Err(OrchestratorError::Rejected {
                    status: *status,
                    body: "scripted".into(),
                })
            })
            .collect();
        Self {
            replies: Mutex::new(replies),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<StartExecutionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Orchestrator for ScriptedOrchestrator {
    async fn start_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<StartExecutionResponse, OrchestratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let execution_id = format!("exec-{}", request.queue_item_id);
        self.requests.lock().push(request);
        self.replies.lock().pop_front().unwrap_or_else(|| {
            Ok(StartExecutionResponse {
                execution_id,
                status: "RUNNING".into(),
            })
        })
    }
}

async fn enqueue(store: &InMemoryExecutionQueueStore, workspace_id: Uuid) -> QueueItem {
    store
        .enqueue(NewQueueItem::new(
            workspace_id,
            Uuid::now_v7(),
            json!({"entityId": Uuid::now_v7()}),
        ))
        .await
        .unwrap()
}

fn pool(
    store: &Arc<InMemoryExecutionQueueStore>,
    orchestrator: &Arc<ScriptedOrchestrator>,
    config: WorkerPoolConfig,
) -> WorkerPool {
    WorkerPool::new(store.clone(), orchestrator.clone(), config)
}

#[tokio::test]
async fn test_run_once_dispatches_pending_items() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::default());
    let workspace_id = Uuid::now_v7();
    let first = enqueue(&store, workspace_id).await;
    let second = enqueue(&store, workspace_id).await;

    let workers = pool(&store, &orchestrator, WorkerPoolConfig::new().with_worker_id("w1"));
    let summary = workers.run_once().await.unwrap();

    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(store.count(QueueStatus::Dispatched), 2);

    let dispatched = store.get(first.id).await.unwrap();
    assert_eq!(
        dispatched.execution_id,
        Some(format!("exec-{}", first.id))
    );
    assert_eq!(dispatched.claimed_by.as_deref(), Some("w1"));

    let requests = orchestrator.requests();
    let request = requests
        .iter()
        .find(|r| r.queue_item_id == second.id)
        .unwrap();
    assert_eq!(request.workflow_definition_id, second.workflow_definition_id);
    assert_eq!(request.workspace_id, workspace_id);
    assert_eq!(request.input, second.input);
}

#[tokio::test]
async fn test_server_errors_requeue_until_exhausted() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::failing_with(&[503, 502, 500]));
    let item = enqueue(&store, Uuid::now_v7()).await;

    let workers = pool(&store, &orchestrator, WorkerPoolConfig::new().with_max_attempts(3));

    let summary = workers.run_once().await.unwrap();
    assert_eq!(summary.requeued, 1);
    let requeued = store.get(item.id).await.unwrap();
    assert_eq!(requeued.status, QueueStatus::Pending);
    assert_eq!(requeued.attempt_count, 1);
    assert!(requeued
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("HTTP_SERVER_ERROR"));

    workers.run_once().await.unwrap();
    let summary = workers.run_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = store.get(item.id).await.unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.attempt_count, 3);
    assert_eq!(orchestrator.requests().len(), 3);

    // nothing left to claim
    assert_eq!(workers.run_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn test_client_error_fails_immediately() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::failing_with(&[404]));
    let item = enqueue(&store, Uuid::now_v7()).await;

    let workers = pool(&store, &orchestrator, WorkerPoolConfig::new().with_max_attempts(5));
    let summary = workers.run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    let failed = store.get(item.id).await.unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("HTTP_CLIENT_ERROR"));
}

#[tokio::test]
async fn test_throttled_dispatch_is_retried() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::failing_with(&[429]));
    let item = enqueue(&store, Uuid::now_v7()).await;

    let workers = pool(&store, &orchestrator, WorkerPoolConfig::default());
    assert_eq!(workers.run_once().await.unwrap().requeued, 1);
    assert_eq!(workers.run_once().await.unwrap().dispatched, 1);
    assert_eq!(store.get(item.id).await.unwrap().status, QueueStatus::Dispatched);
}

#[tokio::test]
async fn test_worker_only_claims_its_workspaces() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::default());
    let ours = Uuid::now_v7();
    let theirs = Uuid::now_v7();
    let mine = enqueue(&store, ours).await;
    let other = enqueue(&store, theirs).await;

    let workers = pool(
        &store,
        &orchestrator,
        WorkerPoolConfig::new().with_workspaces(WorkspaceScope::Only(vec![ours])),
    );
    let summary = workers.run_once().await.unwrap();

    assert_eq!(summary.claimed, 1);
    assert_eq!(store.get(mine.id).await.unwrap().status, QueueStatus::Dispatched);
    assert_eq!(store.get(other.id).await.unwrap().status, QueueStatus::Pending);
}

#[tokio::test]
async fn test_run_once_claims_at_most_one_batch() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::default());
    for _ in 0..5 {
        enqueue(&store, Uuid::now_v7()).await;
    }

    let workers = pool(
        &store,
        &orchestrator,
        WorkerPoolConfig::new()
            .with_max_concurrency(3)
            .with_poller(PollerConfig::new().with_batch_size(10)),
    );

    assert_eq!(workers.run_once().await.unwrap().claimed, 3);
    assert_eq!(store.pending_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_orchestrator_is_timed_out_and_requeued() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::slow(Duration::from_secs(600)));
    let item = enqueue(&store, Uuid::now_v7()).await;

    let workers = pool(
        &store,
        &orchestrator,
        WorkerPoolConfig::new().with_dispatch_timeout(Duration::from_secs(5)),
    );
    let summary = workers.run_once().await.unwrap();

    assert_eq!(summary.requeued, 1);
    let requeued = store.get(item.id).await.unwrap();
    assert_eq!(requeued.status, QueueStatus::Pending);
    assert!(requeued.last_error.unwrap().contains("did not answer"));
}

#[tokio::test]
async fn test_crashed_claims_are_swept_back() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::default());
    let item = enqueue(&store, Uuid::now_v7()).await;

    // a worker that claimed and never reported back
    store.claim("crashed", &WorkspaceScope::All, 1).await.unwrap();

    let workers = pool(
        &store,
        &orchestrator,
        WorkerPoolConfig::new().with_claim_timeout(Duration::ZERO),
    );
    let reclaimed = workers.reclaim_once().await.unwrap();
    assert_eq!(reclaimed, vec![(item.id, FailureOutcome::Requeued { attempt: 1 })]);

    assert_eq!(workers.run_once().await.unwrap().dispatched, 1);
    assert_eq!(store.get(item.id).await.unwrap().status, QueueStatus::Dispatched);
}

/// Orchestrator that is so slow the item is swept and claimed by `w2`
/// before it answers
struct SweptDuringDispatch {
    store: Arc<InMemoryExecutionQueueStore>,
}

#[async_trait]
impl Orchestrator for SweptDuringDispatch {
    async fn start_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<StartExecutionResponse, OrchestratorError> {
        self.store.reclaim_stale(Duration::ZERO, 5).await.unwrap();
        self.store
            .claim("w2", &WorkspaceScope::All, 1)
            .await
            .unwrap();
        Ok(StartExecutionResponse {
            execution_id: format!("exec-{}", request.queue_item_id),
            status: "RUNNING".into(),
        })
    }
}

#[tokio::test]
async fn test_swept_claim_is_not_recorded_by_old_owner() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(SweptDuringDispatch {
        store: store.clone(),
    });
    let item = enqueue(&store, Uuid::now_v7()).await;

    let workers = WorkerPool::new(
        store.clone(),
        orchestrator,
        WorkerPoolConfig::new().with_worker_id("w1"),
    );
    let summary = workers.run_once().await.unwrap();

    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.lost, 1);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.errors, 0);

    let current = store.get(item.id).await.unwrap();
    assert_eq!(current.status, QueueStatus::Claimed);
    assert_eq!(current.claimed_by.as_deref(), Some("w2"));
    assert!(current.execution_id.is_none());
}

#[tokio::test]
async fn test_background_loops_dispatch_and_shut_down() {
    let store = Arc::new(InMemoryExecutionQueueStore::new());
    let orchestrator = Arc::new(ScriptedOrchestrator::default());
    for _ in 0..4 {
        enqueue(&store, Uuid::now_v7()).await;
    }

    let workers = pool(
        &store,
        &orchestrator,
        WorkerPoolConfig::new()
            .with_max_concurrency(2)
            .with_poller(
                PollerConfig::new()
                    .with_min_interval(Duration::from_millis(5))
                    .with_max_interval(Duration::from_millis(20)),
            )
            .with_shutdown_timeout(Duration::from_secs(5)),
    );

    workers.start().await.unwrap();
    assert_eq!(workers.status(), WorkerPoolStatus::Running);
    assert!(matches!(
        workers.start().await,
        Err(WorkerPoolError::AlreadyRunning)
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.count(QueueStatus::Dispatched) < 4 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "items were not dispatched in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    workers.shutdown().await.unwrap();
    assert_eq!(workers.status(), WorkerPoolStatus::Stopped);
    assert_eq!(workers.in_flight(), 0);

    // stopped workers claim nothing new
    let late = enqueue(&store, Uuid::now_v7()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get(late.id).await.unwrap().status, QueueStatus::Pending);

    // and can be restarted
    workers.start().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.get(late.id).await.unwrap().status != QueueStatus::Dispatched {
        assert!(tokio::time::Instant::now() < deadline, "restart did not dispatch");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    workers.shutdown().await.unwrap();
}
