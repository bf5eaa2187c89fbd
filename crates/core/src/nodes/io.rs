//! Input extraction and output building shared by node implementations

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::NodeError;
use crate::execution::{NodeInputs, NodeOutputs};

/// Non-blank string input
pub(crate) fn required_str<'a>(inputs: &'a NodeInputs, key: &str) -> Result<&'a str, NodeError> {
    match inputs.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(NodeError::invalid_argument(format!("'{key}' is required")))
        }
        Some(other) => Err(NodeError::invalid_argument(format!(
            "'{key}' must be a string, got {}",
            type_name(other)
        ))),
    }
}

/// String input parsed as a UUID
pub(crate) fn required_uuid(inputs: &NodeInputs, key: &str) -> Result<Uuid, NodeError> {
    let raw = required_str(inputs, key)?;
    Uuid::parse_str(raw.trim()).map_err(|_| {
        NodeError::invalid_argument(format!("'{key}' must be a valid UUID, got '{raw}'"))
    })
}

/// Object input
pub(crate) fn required_object<'a>(
    inputs: &'a NodeInputs,
    key: &str,
) -> Result<&'a Map<String, Value>, NodeError> {
    optional_object(inputs, key)?
        .ok_or_else(|| NodeError::invalid_argument(format!("'{key}' is required")))
}

/// Object input that may be absent or null
pub(crate) fn optional_object<'a>(
    inputs: &'a NodeInputs,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, NodeError> {
    match inputs.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(NodeError::invalid_argument(format!(
            "'{key}' must be an object, got {}",
            type_name(other)
        ))),
    }
}

/// Serialize a typed output record into the node output map
pub(crate) fn to_outputs<T: Serialize>(output: &T) -> Result<NodeOutputs, NodeError> {
    match serde_json::to_value(output) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(NodeError::illegal_state(format!(
            "node output must serialize to an object, got {}",
            type_name(&other)
        ))),
        Err(e) => Err(NodeError::illegal_state(format!(
            "failed to serialize node output: {e}"
        ))),
    }
}

/// Serialize a config struct into its raw input map.
///
/// Configs are plain data, so failure here is a bug; it is logged and the
/// node sees no inputs, which the required-input checks then reject.
pub(crate) fn to_inputs<T: Serialize>(config: &T) -> NodeInputs {
    to_outputs(config).unwrap_or_else(|e| {
        warn!(error = %e, "node config did not serialize to an input map");
        Map::new()
    })
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::object as inputs;

    #[test]
    fn test_required_str_rejects_blank_and_wrong_types() {
        let inputs = inputs(json!({"a": "  ", "b": 3, "c": "ok"}));
        assert!(required_str(&inputs, "a").is_err());
        assert!(required_str(&inputs, "b").unwrap_err().to_string().contains("number"));
        assert!(required_str(&inputs, "missing").is_err());
        assert_eq!(required_str(&inputs, "c").unwrap(), "ok");
    }

    #[test]
    fn test_required_uuid() {
        let id = Uuid::now_v7();
        let inputs = inputs(json!({"id": id.to_string(), "bad": "not-a-uuid"}));
        assert_eq!(required_uuid(&inputs, "id").unwrap(), id);

        let err = required_uuid(&inputs, "bad").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("not-a-uuid"));
    }

    #[test]
    fn test_optional_object() {
        let inputs = inputs(json!({"o": {"k": 1}, "n": null, "s": "x"}));
        assert!(optional_object(&inputs, "o").unwrap().is_some());
        assert!(optional_object(&inputs, "n").unwrap().is_none());
        assert!(optional_object(&inputs, "s").is_err());
        assert!(required_object(&inputs, "n").is_err());
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refused"))
        }
    }

    #[test]
    fn test_to_outputs_reports_serialization_failures() {
        let err = to_outputs(&Unserializable).unwrap_err();
        assert!(matches!(err, NodeError::IllegalState(_)));
        assert!(err.to_string().contains("refused"));

        let err = to_outputs(&vec![1, 2]).unwrap_err();
        assert!(err.to_string().contains("array"));

        let outputs = to_outputs(&json!({"result": true})).unwrap();
        assert_eq!(outputs["result"], json!(true));
    }

    #[test]
    fn test_to_inputs_falls_back_to_empty() {
        assert!(to_inputs(&Unserializable).is_empty());
        assert!(to_inputs(&"scalar").is_empty());
    }
}
