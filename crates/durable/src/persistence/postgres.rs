//! PostgreSQL implementation of ExecutionQueueStore
//!
//! Production persistence for the execution queue:
//! - Claiming with `FOR UPDATE SKIP LOCKED`, one transaction per batch
//! - Conditional updates for every state transition
//! - Schema managed by the embedded `migrations/`

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::store::*;

/// PostgreSQL implementation of ExecutionQueueStore
///
/// Many workers, in one process or many, can share a store; row locks keep
/// each PENDING item to exactly one claimer.
///
/// # Example
///
/// ```ignore
/// use nodeflow_durable::PostgresExecutionQueueStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/nodeflow").await?;
/// let store = PostgresExecutionQueueStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExecutionQueueStore {
    pool: PgPool,
}

impl PostgresExecutionQueueStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the queue schema
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Error for a conditional update that matched no row
    async fn transition_error(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        to: QueueStatus,
    ) -> StoreError {
        match self.get(id).await {
            Ok(item) => rejected_transition(&item, worker_id, to),
            Err(e) => e,
        }
    }
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| {
        error!("{}: {}", context, e);
        StoreError::Database(e.to_string())
    }
}

fn row_to_item(row: &PgRow) -> Result<QueueItem, StoreError> {
    let status: String = row.get("status");
    Ok(QueueItem {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        workflow_definition_id: row.get("workflow_definition_id"),
        status: status.parse()?,
        input: row.get("input"),
        attempt_count: row.get::<i32, _>("attempt_count") as u32,
        last_error: row.get("last_error"),
        claimed_by: row.get("claimed_by"),
        execution_id: row.get("execution_id"),
        created_at: row.get("created_at"),
        claimed_at: row.get("claimed_at"),
        dispatched_at: row.get("dispatched_at"),
    })
}

fn outcome_from_row(row: &PgRow) -> Result<FailureOutcome, StoreError> {
    let status: String = row.get("status");
    let attempts = row.get::<i32, _>("attempt_count") as u32;
    Ok(failure_outcome(status.parse()?, attempts))
}

#[async_trait]
impl ExecutionQueueStore for PostgresExecutionQueueStore {
    #[instrument(skip(self, item), fields(workspace_id = %item.workspace_id))]
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_execution_queue (
                id, workspace_id, workflow_definition_id, status, input
            )
            VALUES ($1, $2, $3, 'PENDING', $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(item.workspace_id)
        .bind(item.workflow_definition_id)
        .bind(&item.input)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to enqueue item"))?;

        let item = row_to_item(&row)?;
        debug!(queue_item_id = %item.id, "enqueued item");
        Ok(item)
    }

    #[instrument(skip(self, scope))]
    async fn claim(
        &self,
        worker_id: &str,
        scope: &WorkspaceScope,
        max_items: usize,
    ) -> Result<Vec<QueueItem>, StoreError> {
        if max_items == 0 || matches!(scope, WorkspaceScope::Only(ids) if ids.is_empty()) {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin claim transaction"))?;

        // Rows locked by another claimer are skipped, not waited on
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM workflow_execution_queue
                WHERE status = 'PENDING'
                  AND ($1::uuid[] IS NULL OR workspace_id = ANY($1))
                ORDER BY created_at, id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE workflow_execution_queue q
            SET status = 'CLAIMED',
                claimed_by = $3,
                claimed_at = NOW()
            FROM claimable c
            WHERE q.id = c.id
            RETURNING q.*
            "#,
        )
        .bind(scope.workspace_ids().map(|ids| ids.to_vec()))
        .bind(max_items as i64)
        .bind(worker_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to claim items"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit claim"))?;

        let mut claimed = rows.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()?;
        // UPDATE .. RETURNING does not preserve the CTE order
        claimed.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        if !claimed.is_empty() {
            debug!(worker_id, count = claimed.len(), "claimed items");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn mark_dispatched(
        &self,
        id: Uuid,
        worker_id: &str,
        execution_id: &str,
    ) -> Result<QueueItem, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_execution_queue
            SET status = 'DISPATCHED',
                execution_id = $3,
                dispatched_at = NOW()
            WHERE id = $1 AND status = 'CLAIMED' AND claimed_by = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to mark item dispatched"))?;

        match row {
            Some(row) => {
                debug!(queue_item_id = %id, execution_id, "item dispatched");
                row_to_item(&row)
            }
            None => Err(self
                .transition_error(id, Some(worker_id), QueueStatus::Dispatched)
                .await),
        }
    }

    #[instrument(skip(self))]
    async fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureOutcome, StoreError> {
        // SET expressions read the pre-update row
        let row = sqlx::query(
            r#"
            UPDATE workflow_execution_queue
            SET attempt_count = attempt_count + 1,
                last_error = $3,
                status = CASE WHEN attempt_count + 1 >= $4 THEN 'FAILED' ELSE 'PENDING' END,
                claimed_by = NULL,
                claimed_at = NULL
            WHERE id = $1 AND status = 'CLAIMED' AND claimed_by = $2
            RETURNING status, attempt_count
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(max_attempts as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fail item"))?;

        let Some(row) = row else {
            return Err(self
                .transition_error(id, Some(worker_id), QueueStatus::Pending)
                .await);
        };
        let outcome = outcome_from_row(&row)?;
        match outcome {
            FailureOutcome::Requeued { attempt } => {
                debug!(queue_item_id = %id, attempt, "item requeued")
            }
            FailureOutcome::Exhausted { attempts } => {
                warn!(queue_item_id = %id, attempts, "item exhausted its attempts")
            }
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        error: &str,
    ) -> Result<QueueItem, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_execution_queue
            SET attempt_count = attempt_count + CASE WHEN status = 'CLAIMED' THEN 1 ELSE 0 END,
                status = 'FAILED',
                last_error = $3,
                claimed_by = NULL,
                claimed_at = NULL
            WHERE id = $1
              AND (
                ($2::text IS NULL AND status IN ('PENDING', 'CLAIMED'))
                OR (status = 'CLAIMED' AND claimed_by = $2)
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to mark item failed"))?;

        match row {
            Some(row) => {
                warn!(queue_item_id = %id, error, "item failed");
                row_to_item(&row)
            }
            None => Err(self
                .transition_error(id, worker_id, QueueStatus::Failed)
                .await),
        }
    }

    #[instrument(skip(self))]
    async fn reclaim_stale(
        &self,
        claim_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Vec<(Uuid, FailureOutcome)>, StoreError> {
        // claimed_at is written by the database clock, so the cutoff is too
        let rows = sqlx::query(
            r#"
            WITH stale AS (
                SELECT id
                FROM workflow_execution_queue
                WHERE status = 'CLAIMED'
                  AND claimed_at <= NOW() - make_interval(secs => $1)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE workflow_execution_queue q
            SET attempt_count = q.attempt_count + 1,
                last_error = $2,
                status = CASE WHEN q.attempt_count + 1 >= $3 THEN 'FAILED' ELSE 'PENDING' END,
                claimed_by = NULL,
                claimed_at = NULL
            FROM stale s
            WHERE q.id = s.id
            RETURNING q.id, q.status, q.attempt_count
            "#,
        )
        .bind(claim_timeout.as_secs_f64())
        .bind(CLAIM_EXPIRED)
        .bind(max_attempts as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to reclaim stale items"))?;

        let reclaimed = rows
            .iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                Ok((id, outcome_from_row(row)?))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed stale items");
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<QueueItem, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_execution_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get item"))?
            .ok_or(StoreError::ItemNotFound(id))?;

        row_to_item(&row)
    }
}
