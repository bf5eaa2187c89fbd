//! Dispatch worker pool
//!
//! Claims queue items and hands them to the orchestrator, with bounded
//! concurrency, a stale-claim sweeper, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use nodeflow_core::duration_millis;
use uuid::Uuid;

use super::poller::{PollerConfig, QueuePoller};
use super::shutdown_requested;
use crate::orchestrator::{Orchestrator, OrchestratorError, StartExecutionRequest};
use crate::persistence::{
    ExecutionQueueStore, FailureOutcome, QueueItem, StoreError, WorkspaceScope,
};

/// Longest claim timeout a pool accepts
pub const MAX_CLAIM_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID, recorded as `claimed_by`
    pub worker_id: String,

    /// Workspaces this worker claims for
    pub workspaces: WorkspaceScope,

    /// Maximum concurrent dispatches
    pub max_concurrency: usize,

    /// Failed attempts after which an item is FAILED
    pub max_attempts: u32,

    pub poller: PollerConfig,

    /// Upper bound on one orchestrator call
    #[serde(with = "duration_millis")]
    pub dispatch_timeout: Duration,

    /// Stale claim sweep interval
    #[serde(with = "duration_millis")]
    pub stale_reclaim_interval: Duration,

    /// How long a claim may stay CLAIMED before it is swept
    #[serde(with = "duration_millis")]
    pub claim_timeout: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("dispatch-worker-{}", Uuid::now_v7()),
            workspaces: WorkspaceScope::All,
            max_concurrency: 10,
            max_attempts: 5,
            poller: PollerConfig::default(),
            dispatch_timeout: Duration::from_secs(30),
            stale_reclaim_interval: Duration::from_secs(60),
            claim_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_workspaces(mut self, scope: WorkspaceScope) -> Self {
        self.workspaces = scope;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_stale_reclaim_interval(mut self, interval: Duration) -> Self {
        // tokio intervals reject a zero period
        self.stale_reclaim_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout.min(MAX_CLAIM_TIMEOUT);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Claiming and dispatching
    Running,
    /// No longer claiming, waiting for in-flight dispatches
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// What happened to one claimed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { execution_id: String },
    Requeued { attempt: u32 },
    Failed { attempts: u32 },
    /// The claim was swept before the outcome could be recorded
    ClaimLost,
}

/// Totals for one [`WorkerPool::run_once`] cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub dispatched: usize,
    pub requeued: usize,
    pub failed: usize,
    pub lost: usize,
    /// Items whose outcome could not be recorded; the sweeper recovers them
    pub errors: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched { .. } => self.dispatched += 1,
            DispatchOutcome::Requeued { .. } => self.requeued += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::ClaimLost => self.lost += 1,
        }
    }
}

/// Hand one claimed item to the orchestrator and record the outcome
#[instrument(
    skip_all,
    fields(queue_item_id = %item.id, workflow_definition_id = %item.workflow_definition_id)
)]
async fn dispatch_item(
    store: &dyn ExecutionQueueStore,
    orchestrator: &dyn Orchestrator,
    worker_id: &str,
    item: QueueItem,
    max_attempts: u32,
    dispatch_timeout: Duration,
) -> Result<DispatchOutcome, StoreError> {
    match record_dispatch(store, orchestrator, worker_id, item, max_attempts, dispatch_timeout)
        .await
    {
        Err(StoreError::ClaimNotHeld { .. }) => {
            // the new owner dispatches it; queue_item_id deduplicates the start
            warn!(worker_id, "Claim was swept during dispatch, outcome dropped");
            Ok(DispatchOutcome::ClaimLost)
        }
        other => other,
    }
}

async fn record_dispatch(
    store: &dyn ExecutionQueueStore,
    orchestrator: &dyn Orchestrator,
    worker_id: &str,
    item: QueueItem,
    max_attempts: u32,
    dispatch_timeout: Duration,
) -> Result<DispatchOutcome, StoreError> {
    let request = StartExecutionRequest::from(&item);
    let result = match tokio::time::timeout(dispatch_timeout, orchestrator.start_execution(request))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout(dispatch_timeout)),
    };

    let err = match result {
        Ok(started) => {
            store
                .mark_dispatched(item.id, worker_id, &started.execution_id)
                .await?;
            info!(execution_id = %started.execution_id, "Dispatched queue item");
            return Ok(DispatchOutcome::Dispatched {
                execution_id: started.execution_id,
            });
        }
        Err(err) => err,
    };

    let message = format!("{}: {}", err.error_type(), err);
    if !err.is_retryable() {
        let failed = store.mark_failed(item.id, Some(worker_id), &message).await?;
        warn!(error = %message, "Dispatch rejected, item failed");
        return Ok(DispatchOutcome::Failed {
            attempts: failed.attempt_count,
        });
    }

    match store.fail(item.id, worker_id, &message, max_attempts).await? {
        FailureOutcome::Requeued { attempt } => {
            warn!(attempt, error = %message, "Dispatch failed, item requeued");
            Ok(DispatchOutcome::Requeued { attempt })
        }
        FailureOutcome::Exhausted { attempts } => {
            error!(attempts, error = %message, "Dispatch failed, attempts exhausted");
            Ok(DispatchOutcome::Failed { attempts })
        }
    }
}

/// Dispatch worker pool
///
/// # Example
///
/// ```ignore
/// use nodeflow_durable::prelude::*;
///
/// let store = Arc::new(PostgresExecutionQueueStore::new(pool));
/// let orchestrator = Arc::new(HttpOrchestrator::new("http://localhost:8233")?);
/// let config = WorkerPoolConfig::new().with_max_concurrency(20);
///
/// let workers = WorkerPool::new(store, orchestrator, config);
/// workers.start().await?;
///
/// // ... later, graceful shutdown
/// workers.shutdown().await?;
/// ```
pub struct WorkerPool {
    store: Arc<dyn ExecutionQueueStore>,
    orchestrator: Arc<dyn Orchestrator>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    permits: Arc<Semaphore>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    reclaim_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn ExecutionQueueStore>,
        orchestrator: Arc<dyn Orchestrator>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            orchestrator,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            poll_handle: Mutex::new(None),
            reclaim_handle: Mutex::new(None),
        }
    }

    /// Start the poll and reclaim loops
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }

        if self.config.claim_timeout <= self.config.dispatch_timeout {
            warn!(
                claim_timeout_ms = self.config.claim_timeout.as_millis(),
                dispatch_timeout_ms = self.config.dispatch_timeout.as_millis(),
                "Claim timeout does not exceed dispatch timeout; in-flight items may be swept"
            );
        }

        info!(
            workspaces = ?self.config.workspaces,
            max_concurrency = self.config.max_concurrency,
            max_attempts = self.config.max_attempts,
            "Starting dispatch worker pool"
        );

        self.shutdown_tx.send_replace(false);
        self.start_poll_loop();
        self.start_reclaim_loop();
        Ok(())
    }

    /// Stop claiming and wait for in-flight dispatches
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!("Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let poll_handle = self.poll_handle.lock().take();
        let reclaim_handle = self.reclaim_handle.lock().take();
        let loops: Vec<JoinHandle<()>> = [poll_handle, reclaim_handle].into_iter().flatten().collect();
        let max_permits = self.config.max_concurrency as u32;

        let drain = async {
            for handle in loops {
                if let Err(e) = handle.await {
                    error!("Worker loop ended abnormally: {}", e);
                }
            }
            // every in-flight dispatch holds a permit
            let _all = self.permits.acquire_many(max_permits).await;
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, drain).await;
        *self.status.write() = WorkerPoolStatus::Stopped;

        if result.is_err() {
            warn!(in_flight = self.in_flight(), "Shutdown timeout reached");
            return Err(WorkerPoolError::ShutdownTimeout);
        }
        info!("Worker pool stopped");
        Ok(())
    }

    /// One claim-and-dispatch cycle, independent of the background loops
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn run_once(&self) -> Result<DispatchSummary, WorkerPoolError> {
        let max_items = self
            .config
            .poller
            .batch_size
            .min(self.config.max_concurrency);
        let items = self
            .store
            .claim(&self.config.worker_id, &self.config.workspaces, max_items)
            .await?;

        let mut summary = DispatchSummary {
            claimed: items.len(),
            ..Default::default()
        };

        let dispatches = items.into_iter().map(|item| {
            dispatch_item(
                self.store.as_ref(),
                self.orchestrator.as_ref(),
                &self.config.worker_id,
                item,
                self.config.max_attempts,
                self.config.dispatch_timeout,
            )
        });
        for result in futures::future::join_all(dispatches).await {
            match result {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!("Failed to record dispatch outcome: {}", e);
                    summary.errors += 1;
                }
            }
        }

        debug!(?summary, "Dispatch cycle finished");
        Ok(summary)
    }

    /// One stale-claim sweep
    pub async fn reclaim_once(&self) -> Result<Vec<(Uuid, FailureOutcome)>, WorkerPoolError> {
        Ok(self
            .store
            .reclaim_stale(self.config.claim_timeout, self.config.max_attempts)
            .await?)
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Dispatches currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency - self.permits.available_permits()
    }

    fn start_poll_loop(&self) {
        let store = Arc::clone(&self.store);
        let orchestrator = Arc::clone(&self.orchestrator);
        let config = self.config.clone();
        let permits = Arc::clone(&self.permits);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut poller = QueuePoller::new(
                Arc::clone(&store),
                config.worker_id.clone(),
                config.workspaces.clone(),
                config.poller.clone(),
                shutdown_rx,
            );

            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                let available = permits.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available).await {
                    Ok(items) => {
                        for item in items {
                            // only this loop acquires, so a permit is free for every claimed item
                            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                                break;
                            };
                            let store = Arc::clone(&store);
                            let orchestrator = Arc::clone(&orchestrator);
                            let worker_id = config.worker_id.clone();
                            let (max_attempts, timeout) =
                                (config.max_attempts, config.dispatch_timeout);

                            tokio::spawn(async move {
                                let queue_item_id = item.id;
                                let result = dispatch_item(
                                    store.as_ref(),
                                    orchestrator.as_ref(),
                                    &worker_id,
                                    item,
                                    max_attempts,
                                    timeout,
                                )
                                .await;
                                if let Err(e) = result {
                                    error!(%queue_item_id, "Failed to record dispatch outcome: {}", e);
                                }
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => {
                        error!("Poll error: {}", e);
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("Poll loop exited");
        });

        *self.poll_handle.lock() = Some(handle);
    }

    fn start_reclaim_loop(&self) {
        let store = Arc::clone(&self.store);
        let interval = self.config.stale_reclaim_interval;
        let claim_timeout = self.config.claim_timeout;
        let max_attempts = self.config.max_attempts;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.reclaim_stale(claim_timeout, max_attempts).await {
                            Ok(reclaimed) => {
                                if !reclaimed.is_empty() {
                                    info!(count = reclaimed.len(), "Reclaimed stale claims");
                                }
                            }
                            Err(e) => {
                                error!("Stale claim reclamation failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_requested(&mut shutdown_rx) => {
                        debug!("Reclaim loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Reclaim loop exited");
        });

        *self.reclaim_handle.lock() = Some(handle);
    }
}
