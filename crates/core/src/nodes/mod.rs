//! Node configuration model
//!
//! A node's configuration is a closed two-level tagged union. The `type`
//! field selects a [`NodeCategory`], and for every category except FUNCTION
//! a `subType` field selects the concrete config. Decoding goes through an
//! explicit dispatch table (category first, then subtype) and fails on any
//! combination it does not know, including the declared but unimplemented
//! UTILITY and PARSE categories.
//!
//! ```text
//! {"type": "ACTION", "subType": "HTTP_REQUEST", "url": "...", "method": "GET"}
//!  \____ category __/ \______ subtype _______/ \____ subtype fields ____/
//! ```

mod action;
mod condition;
mod function;
mod http;
mod io;
mod trigger;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ConfigError, NodeError};
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};

pub use action::{
    ActionConfig, CreateEntityConfig, DeleteEntityConfig, QueryEntityConfig, UpdateEntityConfig,
};
pub use condition::{ConditionConfig, ConditionOperator, ControlFlowConfig};
pub use function::FunctionConfig;
pub use http::{is_sensitive_header, redact_headers, HttpRequestConfig, REDACTED};
pub use trigger::{
    EntityEventOperation, EntityEventTriggerConfig, FunctionTriggerConfig, ScheduleTriggerConfig,
    TriggerConfig, WebhookTriggerConfig, TRIGGER_PAYLOAD_INPUT,
};

/// First-level node discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCategory {
    Trigger,
    Action,
    ControlFlow,
    Utility,
    Function,
    Parse,
}

impl NodeCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "TRIGGER",
            Self::Action => "ACTION",
            Self::ControlFlow => "CONTROL_FLOW",
            Self::Utility => "UTILITY",
            Self::Function => "FUNCTION",
            Self::Parse => "PARSE",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "TRIGGER" => Some(Self::Trigger),
            "ACTION" => Some(Self::Action),
            "CONTROL_FLOW" => Some(Self::ControlFlow),
            "UTILITY" => Some(Self::Utility),
            "FUNCTION" => Some(Self::Function),
            "PARSE" => Some(Self::Parse),
            _ => None,
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded node configuration
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    ControlFlow(ControlFlowConfig),
    Function(FunctionConfig),
}

impl NodeConfig {
    pub fn category(&self) -> NodeCategory {
        match self {
            Self::Trigger(_) => NodeCategory::Trigger,
            Self::Action(_) => NodeCategory::Action,
            Self::ControlFlow(_) => NodeCategory::ControlFlow,
            Self::Function(_) => NodeCategory::Function,
        }
    }

    /// Second-level tag; `None` for FUNCTION
    pub fn sub_type(&self) -> Option<&'static str> {
        match self {
            Self::Trigger(config) => Some(config.sub_type()),
            Self::Action(config) => Some(config.sub_type()),
            Self::ControlFlow(config) => Some(config.sub_type()),
            Self::Function(_) => None,
        }
    }

    /// Decode a wire payload through the category/subtype dispatch table
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(mut fields) = value else {
            return Err(ConfigError::NotAnObject);
        };

        let category = match fields.remove("type") {
            Some(Value::String(tag)) => {
                NodeCategory::parse(&tag).ok_or(ConfigError::UnknownCategory(tag))?
            }
            Some(other) => return Err(ConfigError::UnknownCategory(other.to_string())),
            None => return Err(ConfigError::MissingField("type")),
        };

        let sub_type = match fields.remove("subType") {
            Some(Value::String(tag)) => Some(tag),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let body = Value::Object(fields);
        match category {
            NodeCategory::Trigger => {
                TriggerConfig::decode(&require_sub_type(sub_type)?, body).map(Self::Trigger)
            }
            NodeCategory::Action => {
                ActionConfig::decode(&require_sub_type(sub_type)?, body).map(Self::Action)
            }
            NodeCategory::ControlFlow => {
                ControlFlowConfig::decode(&require_sub_type(sub_type)?, body).map(Self::ControlFlow)
            }
            NodeCategory::Function => match sub_type {
                None => decode_body(category, "FUNCTION", body).map(Self::Function),
                Some(sub_type) => Err(ConfigError::UnknownSubType { category, sub_type }),
            },
            NodeCategory::Utility | NodeCategory::Parse => {
                Err(ConfigError::NotImplemented { category, sub_type })
            }
        }
    }

    /// Encode to the wire payload, tags included
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let body = match self {
            Self::Trigger(config) => config.to_body()?,
            Self::Action(config) => config.to_body()?,
            Self::ControlFlow(config) => config.to_body()?,
            Self::Function(config) => serde_json::to_value(config)?,
        };

        let mut fields = Map::new();
        fields.insert(
            "type".to_string(),
            Value::String(self.category().as_str().to_string()),
        );
        if let Some(sub_type) = self.sub_type() {
            fields.insert("subType".to_string(), Value::String(sub_type.to_string()));
        }
        if let Value::Object(body) = body {
            fields.extend(body);
        }
        Ok(Value::Object(fields))
    }
}

#[async_trait]
impl ExecutableNode for NodeConfig {
    fn inputs(&self) -> NodeInputs {
        match self {
            Self::Trigger(config) => config.inputs(),
            Self::Action(config) => config.inputs(),
            Self::ControlFlow(config) => config.inputs(),
            Self::Function(config) => config.inputs(),
        }
    }

    async fn execute(
        &self,
        ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        match self {
            Self::Trigger(config) => config.execute(ctx, inputs, services).await,
            Self::Action(config) => config.execute(ctx, inputs, services).await,
            Self::ControlFlow(config) => config.execute(ctx, inputs, services).await,
            Self::Function(config) => config.execute(ctx, inputs, services).await,
        }
    }
}

impl Serialize for NodeConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

fn require_sub_type(sub_type: Option<String>) -> Result<String, ConfigError> {
    sub_type.ok_or(ConfigError::MissingField("subType"))
}

/// Deserialize the subtype-specific fields of a config
pub(crate) fn decode_body<T: DeserializeOwned>(
    category: NodeCategory,
    sub_type: &str,
    body: Value,
) -> Result<T, ConfigError> {
    serde_json::from_value(body).map_err(|source| ConfigError::Invalid {
        category,
        sub_type: sub_type.to_string(),
        source,
    })
}
