//! Node execution contract and step runner
//!
//! Every node implements [`ExecutableNode`]. Inputs reach `execute` already
//! template-resolved; `execute` itself never reads the data store.
//!
//! [`StepRunner`] performs one step for the coordinator: resolve inputs, run
//! `execute` under a timeout, record the [`StepOutput`], and classify any
//! failure. It never retries; the classification tells the caller whether a
//! retry makes sense.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::classifier::{classify_with_message, WorkflowErrorType};
use crate::datastore::{ExecutionMetadata, FailureOutput, NodeOutput, StepOutput, StepStatus, WorkflowDataStore};
use crate::error::NodeError;
use crate::model::WorkflowNode;
use crate::services::{EntityService, HttpClient};
use crate::template;
use crate::url_guard::UrlGuard;

/// Node inputs, keyed by input name
pub type NodeInputs = Map<String, Value>;

/// Node outputs, keyed by output name
pub type NodeOutputs = Map<String, Value>;

/// What a node knows about the execution it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeExecutionContext {
    pub workspace_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub workflow_definition_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
    pub node_name: Option<String>,
}

impl NodeExecutionContext {
    pub fn new(workspace_id: Uuid) -> Self {
        Self {
            workspace_id,
            execution_id: None,
            workflow_definition_id: None,
            node_id: None,
            node_name: None,
        }
    }

    pub fn for_execution(metadata: &ExecutionMetadata) -> Self {
        Self {
            workspace_id: metadata.workspace_id,
            execution_id: Some(metadata.execution_id),
            workflow_definition_id: Some(metadata.workflow_definition_id),
            node_id: None,
            node_name: None,
        }
    }

    pub fn with_node(mut self, node: &WorkflowNode) -> Self {
        self.node_id = Some(node.id);
        self.node_name = Some(node.name.clone());
        self
    }
}

/// External collaborators available to nodes
#[derive(Clone)]
pub struct NodeServices {
    pub entities: Arc<dyn EntityService>,
    pub http: Arc<dyn HttpClient>,
    pub url_guard: UrlGuard,
}

impl NodeServices {
    pub fn new(entities: Arc<dyn EntityService>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            entities,
            http,
            url_guard: UrlGuard::default(),
        }
    }

    pub fn with_url_guard(mut self, url_guard: UrlGuard) -> Self {
        self.url_guard = url_guard;
        self
    }
}

impl std::fmt::Debug for NodeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServices")
            .field("url_guard", &self.url_guard)
            .finish_non_exhaustive()
    }
}

/// Uniform execution interface implemented by every node config
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Raw inputs as configured, possibly containing template expressions
    fn inputs(&self) -> NodeInputs;

    /// Execute with template-resolved inputs
    async fn execute(
        &self,
        ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError>;
}

// ============================================================================
// Step runner
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRunnerConfig {
    /// Upper bound on one node's `execute`
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for StepRunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl StepRunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A failed step, classified
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step '{node_name}' failed ({error_type}): {message}")]
pub struct StepFailure {
    pub node_name: String,
    pub error_type: WorkflowErrorType,
    pub message: String,
    pub retryable: bool,
}

/// Runs single workflow steps
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    config: StepRunnerConfig,
}

impl StepRunner {
    pub fn new(config: StepRunnerConfig) -> Self {
        Self { config }
    }

    /// Execute `node` and record its output on `store`.
    ///
    /// Dropping the returned future abandons the node's in-flight I/O and
    /// records nothing.
    #[instrument(skip_all, fields(node = %node.name, category = %node.category()))]
    pub async fn run(
        &self,
        node: &WorkflowNode,
        store: &mut WorkflowDataStore,
        ctx: &NodeExecutionContext,
        services: &NodeServices,
    ) -> Result<StepOutput, StepFailure> {
        let executed_at = Utc::now();
        let started = Instant::now();

        let result = self.execute(node, store, ctx, services).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(outputs) => {
                let step = StepOutput {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    status: StepStatus::Completed,
                    output: NodeOutput::from_outputs(&node.config, outputs),
                    executed_at,
                    duration_ms,
                };
                debug!(duration_ms, "Step completed");
                store.record_step(step.clone());
                Ok(step)
            }
            Err(error) => {
                let classified = classify_with_message(&error, node.category());
                warn!(
                    error_type = %classified.error_type,
                    retryable = classified.retryable,
                    duration_ms,
                    "Step failed: {}",
                    classified.message
                );
                store.record_step(StepOutput {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    status: StepStatus::Failed,
                    output: NodeOutput::Failure(FailureOutput::from(&classified)),
                    executed_at,
                    duration_ms,
                });
                Err(StepFailure {
                    node_name: node.name.clone(),
                    error_type: classified.error_type,
                    message: classified.message,
                    retryable: classified.retryable,
                })
            }
        }
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        store: &WorkflowDataStore,
        ctx: &NodeExecutionContext,
        services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        let inputs = template::resolve_all(&node.config.inputs(), store)?;
        tokio::time::timeout(
            self.config.timeout,
            node.config.execute(ctx, &inputs, services),
        )
        .await
        .map_err(|_| NodeError::Timeout(self.config.timeout))?
    }
}

/// Serde support for Duration as milliseconds
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
