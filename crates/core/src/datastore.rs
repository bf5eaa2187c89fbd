//! Per-execution data store
//!
//! One [`WorkflowDataStore`] exists per execution and is owned by whatever
//! drives that execution. It is never shared, so it carries no locking.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::classifier::{ClassifiedError, WorkflowErrorType};
use crate::nodes::{ActionConfig, ControlFlowConfig, NodeConfig};
use crate::services::Entity;

#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    #[error("trigger payload is already set for this execution")]
    TriggerAlreadySet,

    #[error("loop '{0}' is not active")]
    UnknownLoop(String),

    #[error("loop '{loop_id}' has no item at index {index} (total {total_items})")]
    LoopExhausted {
        loop_id: String,
        index: usize,
        total_items: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub execution_id: Uuid,
    pub workspace_id: Uuid,
    pub workflow_definition_id: Uuid,
    pub version: i32,
    pub started_at: DateTime<Utc>,
}

impl ExecutionMetadata {
    pub fn new(workspace_id: Uuid, workflow_definition_id: Uuid, version: i32) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            workspace_id,
            workflow_definition_id,
            version,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    Initializing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

// ============================================================================
// Step outputs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityOutput {
    pub entity_id: Uuid,
    pub entity_type_id: Uuid,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntityOutput {
    pub entity_id: Uuid,
    pub updated: bool,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntityOutput {
    pub entity_id: Uuid,
    pub deleted: bool,
    pub impacted_entities: usize,
}

/// Full entity projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEntityOutput {
    pub entity_id: Uuid,
    pub entity_type_id: Uuid,
    pub workspace_id: Uuid,
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Entity> for QueryEntityOutput {
    fn from(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id,
            entity_type_id: entity.type_id,
            workspace_id: entity.workspace_id,
            payload: entity.payload.clone(),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseOutput {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub url: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionOutput {
    pub result: bool,
}

/// Classified failure recorded on a failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureOutput {
    pub error_type: WorkflowErrorType,
    pub message: String,
    pub retryable: bool,
}

impl From<&ClassifiedError> for FailureOutput {
    fn from(classified: &ClassifiedError) -> Self {
        Self {
            error_type: classified.error_type,
            message: classified.message.clone(),
            retryable: classified.retryable,
        }
    }
}

/// Category-specific step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOutput {
    CreateEntity(CreateEntityOutput),
    UpdateEntity(UpdateEntityOutput),
    DeleteEntity(DeleteEntityOutput),
    QueryEntity(QueryEntityOutput),
    HttpRequest(HttpResponseOutput),
    Condition(ConditionOutput),
    /// Untyped output of trigger and function nodes
    Data(Map<String, Value>),
    Failure(FailureOutput),
}

impl NodeOutput {
    /// Type the raw outputs of `config`'s execution.
    ///
    /// Falls back to [`NodeOutput::Data`] if the outputs do not match the
    /// shape the node type produces.
    pub fn from_outputs(config: &NodeConfig, outputs: Map<String, Value>) -> Self {
        let value = Value::Object(outputs);
        let typed = match config {
            NodeConfig::Action(ActionConfig::CreateEntity(_)) => {
                serde_json::from_value(value.clone()).map(Self::CreateEntity)
            }
            NodeConfig::Action(ActionConfig::UpdateEntity(_)) => {
                serde_json::from_value(value.clone()).map(Self::UpdateEntity)
            }
            NodeConfig::Action(ActionConfig::DeleteEntity(_)) => {
                serde_json::from_value(value.clone()).map(Self::DeleteEntity)
            }
            NodeConfig::Action(ActionConfig::QueryEntity(_)) => {
                serde_json::from_value(value.clone()).map(Self::QueryEntity)
            }
            NodeConfig::Action(ActionConfig::HttpRequest(_)) => {
                serde_json::from_value(value.clone()).map(Self::HttpRequest)
            }
            NodeConfig::ControlFlow(ControlFlowConfig::Condition(_)) => {
                serde_json::from_value(value.clone()).map(Self::Condition)
            }
            NodeConfig::Trigger(_) | NodeConfig::Function(_) => return Self::Data(into_map(value)),
        };

        typed.unwrap_or_else(|e| {
            warn!(error = %e, "Node output did not match its typed shape, storing untyped");
            Self::Data(into_map(value))
        })
    }

    /// The output as a JSON value, in the same shape the node returned
    pub fn to_value(&self) -> Value {
        let value = match self {
            Self::CreateEntity(output) => serde_json::to_value(output),
            Self::UpdateEntity(output) => serde_json::to_value(output),
            Self::DeleteEntity(output) => serde_json::to_value(output),
            Self::QueryEntity(output) => serde_json::to_value(output),
            Self::HttpRequest(output) => serde_json::to_value(output),
            Self::Condition(output) => serde_json::to_value(output),
            Self::Data(map) => Ok(Value::Object(map.clone())),
            Self::Failure(output) => serde_json::to_value(output),
        };
        value.unwrap_or(Value::Null)
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub node_id: Uuid,
    pub node_name: String,
    pub status: StepStatus,
    pub output: NodeOutput,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepOutput {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopContext {
    pub loop_id: String,
    pub current_index: usize,
    pub current_item: Value,
    pub total_items: usize,
}

impl LoopContext {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDataStore {
    metadata: ExecutionMetadata,
    phase: ExecutionPhase,
    steps: HashMap<String, StepOutput>,
    trigger: Option<Value>,
    variables: HashMap<String, Value>,
    loops: HashMap<String, LoopContext>,
}

impl WorkflowDataStore {
    pub fn new(metadata: ExecutionMetadata) -> Self {
        Self {
            metadata,
            phase: ExecutionPhase::Initializing,
            steps: HashMap::new(),
            trigger: None,
            variables: HashMap::new(),
            loops: HashMap::new(),
        }
    }

    pub fn metadata(&self) -> &ExecutionMetadata {
        &self.metadata
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ExecutionPhase) {
        self.phase = phase;
    }

    /// Set the trigger payload. Allowed once per execution.
    pub fn set_trigger(&mut self, payload: Value) -> Result<(), DataStoreError> {
        if self.trigger.is_some() {
            return Err(DataStoreError::TriggerAlreadySet);
        }
        self.trigger = Some(payload);
        Ok(())
    }

    pub fn trigger(&self) -> Option<&Value> {
        self.trigger.as_ref()
    }

    /// Record a step's output, replacing any earlier output for the same node name
    pub fn record_step(&mut self, output: StepOutput) {
        self.steps.insert(output.node_name.clone(), output);
    }

    pub fn step(&self, node_name: &str) -> Option<&StepOutput> {
        self.steps.get(node_name)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepOutput> {
        self.steps.values()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Start a loop over `items`, positioned on the first item
    pub fn enter_loop(&mut self, loop_id: impl Into<String>, items: &[Value]) -> &LoopContext {
        let loop_id = loop_id.into();
        let context = LoopContext {
            loop_id: loop_id.clone(),
            current_index: 0,
            current_item: items.first().cloned().unwrap_or(Value::Null),
            total_items: items.len(),
        };
        self.loops.insert(loop_id.clone(), context);
        &self.loops[&loop_id]
    }

    /// Move an active loop to its next item
    pub fn advance_loop(&mut self, loop_id: &str, items: &[Value]) -> Result<&LoopContext, DataStoreError> {
        let context = self
            .loops
            .get_mut(loop_id)
            .ok_or_else(|| DataStoreError::UnknownLoop(loop_id.to_string()))?;

        let next = context.current_index + 1;
        let item = items.get(next).ok_or_else(|| DataStoreError::LoopExhausted {
            loop_id: loop_id.to_string(),
            index: next,
            total_items: context.total_items,
        })?;

        context.current_index = next;
        context.current_item = item.clone();
        Ok(context)
    }

    pub fn exit_loop(&mut self, loop_id: &str) -> Option<LoopContext> {
        self.loops.remove(loop_id)
    }

    pub fn loop_context(&self, loop_id: &str) -> Option<&LoopContext> {
        self.loops.get(loop_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::nodes::{FunctionConfig, QueryEntityConfig};

    fn store() -> WorkflowDataStore {
        WorkflowDataStore::new(ExecutionMetadata::new(Uuid::now_v7(), Uuid::now_v7(), 1))
    }

    #[test]
    fn test_trigger_is_set_once() {
        let mut store = store();
        assert!(store.trigger().is_none());
        store.set_trigger(json!({"a": 1})).unwrap();
        assert!(matches!(
            store.set_trigger(json!({"a": 2})),
            Err(DataStoreError::TriggerAlreadySet)
        ));
        assert_eq!(store.trigger(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_loop_lifecycle() {
        let mut store = store();
        let items = vec![json!("a"), json!("b")];

        let context = store.enter_loop("each_row", &items);
        assert_eq!(context.current_index, 0);
        assert_eq!(context.current_item, json!("a"));
        assert_eq!(context.total_items, 2);

        let context = store.advance_loop("each_row", &items).unwrap();
        assert_eq!(context.current_index, 1);
        assert_eq!(context.current_item, json!("b"));

        assert!(matches!(
            store.advance_loop("each_row", &items),
            Err(DataStoreError::LoopExhausted { index: 2, .. })
        ));
        assert!(store.exit_loop("each_row").is_some());
        assert!(matches!(
            store.advance_loop("each_row", &items),
            Err(DataStoreError::UnknownLoop(_))
        ));
    }

    #[test]
    fn test_outputs_are_typed_by_node_config() {
        let query = NodeConfig::Action(ActionConfig::QueryEntity(QueryEntityConfig {
            entity_id: String::new(),
        }));
        let outputs = match json!({
            "entityId": Uuid::now_v7(),
            "entityTypeId": Uuid::now_v7(),
            "workspaceId": Uuid::now_v7(),
            "payload": {"name": "Acme"},
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:00Z"
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let output = NodeOutput::from_outputs(&query, outputs.clone());
        assert!(matches!(output, NodeOutput::QueryEntity(_)));
        assert_eq!(output.to_value()["payload"]["name"], json!("Acme"));

        let function = NodeConfig::Function(FunctionConfig {
            function_name: "f".to_string(),
            arguments: Map::new(),
        });
        assert!(matches!(
            NodeOutput::from_outputs(&function, outputs),
            NodeOutput::Data(_)
        ));
    }

    #[test]
    fn test_mismatched_outputs_fall_back_to_data() {
        let query = NodeConfig::Action(ActionConfig::QueryEntity(QueryEntityConfig {
            entity_id: String::new(),
        }));
        let mut outputs = Map::new();
        outputs.insert("unexpected".to_string(), json!(true));
        let output = NodeOutput::from_outputs(&query, outputs);
        assert_eq!(output.to_value(), json!({"unexpected": true}));
    }
}
