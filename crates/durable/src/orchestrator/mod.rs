//! Dispatch to the external durable-execution orchestrator
//!
//! The orchestrator owns scheduling and step retries once an execution is
//! started. This module only starts executions and labels failures so the
//! worker can decide between requeueing and failing a queue item.

mod http;

use std::time::Duration;

use async_trait::async_trait;
use nodeflow_core::WorkflowErrorType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persistence::QueueItem;

pub use http::HttpOrchestrator;

/// Request to start one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionRequest {
    pub workflow_definition_id: Uuid,
    pub workspace_id: Uuid,
    pub input: serde_json::Value,
    /// Idempotency key: a requeued item is started with the same key
    pub queue_item_id: Uuid,
}

impl From<&QueueItem> for StartExecutionRequest {
    fn from(item: &QueueItem) -> Self {
        Self {
            workflow_definition_id: item.workflow_definition_id,
            workspace_id: item.workspace_id,
            input: item.input.clone(),
            queue_item_id: item.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionResponse {
    pub execution_id: String,
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The orchestrator answered with a non-success status
    #[error("orchestrator rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The orchestrator could not be reached
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("orchestrator did not answer within {0:?}")]
    Timeout(Duration),

    /// A success status with a body that is not a [`StartExecutionResponse`]
    #[error("invalid orchestrator response: {0}")]
    InvalidResponse(String),

    #[error("invalid orchestrator configuration: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Label using the same HTTP rules as node failures
    pub fn error_type(&self) -> WorkflowErrorType {
        match self {
            Self::Rejected { status, .. } => WorkflowErrorType::from_http_status(*status)
                .unwrap_or(WorkflowErrorType::ExecutionError),
            Self::Config(_) => WorkflowErrorType::ValidationError,
            Self::Unavailable(_) | Self::Timeout(_) | Self::InvalidResponse(_) => {
                WorkflowErrorType::ExecutionError
            }
        }
    }

    /// Whether the queue item should be requeued
    ///
    /// 408 and 429 are client statuses that still succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected {
                status: 408 | 429, ..
            } => true,
            _ => self.error_type().is_retryable(),
        }
    }
}

/// External orchestrator dispatch API
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    async fn start_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<StartExecutionResponse, OrchestratorError>;
}
