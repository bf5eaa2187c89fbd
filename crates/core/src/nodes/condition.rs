//! CONTROL_FLOW node configs

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::io::{required_str, to_inputs, to_outputs, type_name};
use super::{decode_body, NodeCategory};
use crate::datastore::ConditionOutput;
use crate::error::{ConfigError, NodeError};
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Contains,
    IsNull,
    IsNotNull,
}

impl ConditionOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(json!(raw.trim().to_ascii_uppercase())).ok()
    }

    /// Compare two resolved operands
    pub fn evaluate(&self, left: &Value, right: &Value) -> Result<bool, NodeError> {
        match self {
            Self::Equals => Ok(values_equal(left, right)),
            Self::NotEquals => Ok(!values_equal(left, right)),
            Self::GreaterThan => Ok(compare(left, right)? == Ordering::Greater),
            Self::GreaterThanOrEquals => Ok(compare(left, right)? != Ordering::Less),
            Self::LessThan => Ok(compare(left, right)? == Ordering::Less),
            Self::LessThanOrEquals => Ok(compare(left, right)? != Ordering::Greater),
            Self::Contains => contains(left, right),
            Self::IsNull => Ok(left.is_null()),
            Self::IsNotNull => Ok(!left.is_null()),
        }
    }
}

/// `left <operator> right`. The operator is kept as written so an unknown
/// operator surfaces at execution as a validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(default)]
    pub left: Value,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub right: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlowConfig {
    Condition(ConditionConfig),
}

impl ControlFlowConfig {
    pub const fn sub_type(&self) -> &'static str {
        match self {
            Self::Condition(_) => "CONDITION",
        }
    }

    pub(super) fn decode(sub_type: &str, body: Value) -> Result<Self, ConfigError> {
        let category = NodeCategory::ControlFlow;
        match sub_type {
            "CONDITION" => decode_body(category, sub_type, body).map(Self::Condition),
            "SWITCH" | "LOOP" => Err(ConfigError::NotImplemented {
                category,
                sub_type: Some(sub_type.to_string()),
            }),
            _ => Err(ConfigError::UnknownSubType {
                category,
                sub_type: sub_type.to_string(),
            }),
        }
    }

    pub(super) fn to_body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Condition(config) => serde_json::to_value(config),
        }
    }
}

#[async_trait]
impl ExecutableNode for ControlFlowConfig {
    fn inputs(&self) -> NodeInputs {
        match self {
            Self::Condition(config) => to_inputs(config),
        }
    }

    async fn execute(
        &self,
        _ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        _services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        match self {
            Self::Condition(_) => {
                let raw = required_str(inputs, "operator")?;
                let operator = ConditionOperator::parse(raw).ok_or_else(|| {
                    NodeError::invalid_argument(format!("Unknown condition operator '{raw}'"))
                })?;
                let left = inputs.get("left").unwrap_or(&Value::Null);
                let right = inputs.get("right").unwrap_or(&Value::Null);

                let result = operator.evaluate(left, right)?;
                to_outputs(&ConditionOutput { result })
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, NodeError> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        NodeError::illegal_state(format!(
            "Cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))
    })
}

fn contains(left: &Value, right: &Value) -> Result<bool, NodeError> {
    match left {
        Value::String(haystack) => Ok(haystack.contains(template::stringify(right).as_str())),
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, right))),
        Value::Object(map) => Ok(right.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(NodeError::illegal_state(format!(
            "CONTAINS is not supported on {}",
            type_name(other)
        ))),
    }
}
