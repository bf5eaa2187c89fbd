//! TRIGGER node configs
//!
//! Triggers start an execution. Their payload arrives from outside the core
//! and is placed on the data store before the graph is walked, so executing a
//! trigger node just surfaces that payload as the node's output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{decode_body, NodeCategory};
use crate::error::{ConfigError, NodeError};
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};

/// Input key under which a trigger node exposes the execution's trigger payload
pub const TRIGGER_PAYLOAD_INPUT: &str = "payload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTriggerConfig {
    pub cron_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityEventOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEventTriggerConfig {
    pub entity_type_id: Uuid,
    pub operation: EntityEventOperation,
    /// Only fire when one of these fields changed; empty means any change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl EntityEventTriggerConfig {
    /// Whether an entity event with the given changed fields should fire this trigger
    pub fn matches(&self, operation: EntityEventOperation, changed_fields: &[String]) -> bool {
        if operation != self.operation {
            return false;
        }
        self.fields.is_empty() || changed_fields.iter().any(|f| self.fields.contains(f))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerConfig {
    Schedule(ScheduleTriggerConfig),
    EntityEvent(EntityEventTriggerConfig),
    Webhook(WebhookTriggerConfig),
    Function(FunctionTriggerConfig),
}

impl TriggerConfig {
    pub const fn sub_type(&self) -> &'static str {
        match self {
            Self::Schedule(_) => "SCHEDULE",
            Self::EntityEvent(_) => "ENTITY_EVENT",
            Self::Webhook(_) => "WEBHOOK",
            Self::Function(_) => "FUNCTION",
        }
    }

    pub(super) fn decode(sub_type: &str, body: Value) -> Result<Self, ConfigError> {
        let category = NodeCategory::Trigger;
        match sub_type {
            "SCHEDULE" => decode_body(category, sub_type, body).map(Self::Schedule),
            "ENTITY_EVENT" => decode_body(category, sub_type, body).map(Self::EntityEvent),
            "WEBHOOK" => decode_body(category, sub_type, body).map(Self::Webhook),
            "FUNCTION" => decode_body(category, sub_type, body).map(Self::Function),
            _ => Err(ConfigError::UnknownSubType {
                category,
                sub_type: sub_type.to_string(),
            }),
        }
    }

    pub(super) fn to_body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Schedule(config) => serde_json::to_value(config),
            Self::EntityEvent(config) => serde_json::to_value(config),
            Self::Webhook(config) => serde_json::to_value(config),
            Self::Function(config) => serde_json::to_value(config),
        }
    }
}

#[async_trait]
impl ExecutableNode for TriggerConfig {
    fn inputs(&self) -> NodeInputs {
        let mut inputs = Map::new();
        inputs.insert(
            TRIGGER_PAYLOAD_INPUT.to_string(),
            Value::String("{{ trigger }}".to_string()),
        );
        inputs
    }

    async fn execute(
        &self,
        _ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        _services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        Ok(inputs.clone())
    }
}
