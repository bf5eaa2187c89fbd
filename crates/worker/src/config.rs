// Worker configuration from environment variables

use std::time::Duration;

use anyhow::{Context, Result};
use nodeflow_durable::{PollerConfig, WorkerPoolConfig, WorkspaceScope, MAX_CLAIM_TIMEOUT};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub orchestrator_url: String,
    pub worker_id: String,
    /// Empty means every workspace
    pub workspace_ids: Vec<Uuid>,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub claim_timeout: Duration,
    pub reclaim_interval: Duration,
    pub orchestrator_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment
    ///
    /// - DATABASE_URL (required)
    /// - ORCHESTRATOR_URL (default: http://localhost:8233)
    /// - WORKER_ID (default: dispatch-worker-<uuid>)
    /// - WORKER_WORKSPACE_IDS: comma separated (default: all workspaces)
    /// - QUEUE_BATCH_SIZE (default: 10)
    /// - QUEUE_MAX_CONCURRENCY (default: 10)
    /// - QUEUE_MAX_ATTEMPTS (default: 5)
    /// - QUEUE_CLAIM_TIMEOUT_SECS (default: 300, at most 7 days)
    /// - QUEUE_RECLAIM_INTERVAL_SECS (default: 60, at most 7 days)
    /// - ORCHESTRATOR_TIMEOUT_SECS (default: 30)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL not set")?;

        let orchestrator_url =
            lookup("ORCHESTRATOR_URL").unwrap_or_else(|| "http://localhost:8233".to_string());

        let worker_id = lookup("WORKER_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("dispatch-worker-{}", Uuid::now_v7()));

        let workspace_ids = match lookup("WORKER_WORKSPACE_IDS") {
            Some(raw) => parse_workspace_ids(&raw)?,
            None => Vec::new(),
        };

        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let max_secs = MAX_CLAIM_TIMEOUT.as_secs();
        let bounded_secs =
            |key: &str, default: u64| Duration::from_secs(number(key, default).min(max_secs));

        Ok(Self {
            database_url,
            orchestrator_url,
            worker_id,
            workspace_ids,
            batch_size: number("QUEUE_BATCH_SIZE", 10) as usize,
            max_concurrency: number("QUEUE_MAX_CONCURRENCY", 10) as usize,
            max_attempts: number("QUEUE_MAX_ATTEMPTS", 5) as u32,
            claim_timeout: bounded_secs("QUEUE_CLAIM_TIMEOUT_SECS", 300),
            reclaim_interval: bounded_secs("QUEUE_RECLAIM_INTERVAL_SECS", 60),
            orchestrator_timeout: Duration::from_secs(number("ORCHESTRATOR_TIMEOUT_SECS", 30)),
        })
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_id(self.worker_id.clone())
            .with_workspaces(WorkspaceScope::from_ids(self.workspace_ids.clone()))
            .with_max_concurrency(self.max_concurrency)
            .with_max_attempts(self.max_attempts)
            .with_poller(PollerConfig::new().with_batch_size(self.batch_size))
            .with_dispatch_timeout(self.orchestrator_timeout)
            .with_claim_timeout(self.claim_timeout)
            .with_stale_reclaim_interval(self.reclaim_interval)
    }
}

fn parse_workspace_ids(raw: &str) -> Result<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            Uuid::parse_str(id)
                .with_context(|| format!("invalid workspace id in WORKER_WORKSPACE_IDS: {id}"))
        })
        .collect()
}
