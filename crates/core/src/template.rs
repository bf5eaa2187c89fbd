//! Template resolution
//!
//! Resolves `{{ <root>.<path> }}` expressions against a [`WorkflowDataStore`].
//!
//! | Root | Resolves against | Missing data |
//! |------|------------------|--------------|
//! | `steps.<node>.<path>` | output of a successfully completed step | null |
//! | `trigger.<path>` | the execution's trigger payload | error if no trigger is set |
//! | `variables.<name>.<path>` | workflow variables | null |
//! | `loops.<id>.<path>` | active loop contexts | null |
//!
//! A string that is exactly one template keeps the resolved value's type.
//! Templates embedded in surrounding text are stringified and concatenated.
//! Resolution is pure and never performs I/O.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::datastore::WorkflowDataStore;

static EMBEDDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid template regex"));

static WHOLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\{\s*([^{}]*?)\s*\}\}$").expect("valid template regex"));

/// Segment skipped after `steps.<node>` for backward compatibility
const LEGACY_OUTPUT_SEGMENT: &str = "output";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Invalid root segment '{0}'. Must be: steps, trigger, variables, loops")]
    InvalidRoot(String),

    #[error("Template '{{{{ steps }}}}' must include node name")]
    MissingNodeName,

    #[error("Template '{{{{ variables }}}}' must include variable name")]
    MissingVariableName,

    #[error("Template '{{{{ loops }}}}' must include loop name")]
    MissingLoopName,

    #[error("Trigger not set. Cannot resolve {{{{ trigger.* }}}}")]
    TriggerNotSet,

    #[error("Malformed template expression '{0}'")]
    Malformed(String),
}

/// Whether `s` contains at least one template expression
pub fn contains_template(s: &str) -> bool {
    EMBEDDED.is_match(s)
}

/// Resolve every string leaf in `config`, leaving other values untouched
pub fn resolve_all(
    config: &Map<String, Value>,
    store: &WorkflowDataStore,
) -> Result<Map<String, Value>, TemplateError> {
    config
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve(value, store)?)))
        .collect()
}

/// Resolve a single value, recursing into arrays and objects
pub fn resolve(value: &Value, store: &WorkflowDataStore) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve_str(s, store),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, store))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_all(map, store).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve a string that may contain templates
pub fn resolve_str(s: &str, store: &WorkflowDataStore) -> Result<Value, TemplateError> {
    if let Some(captures) = WHOLE.captures(s) {
        return resolve_expression(&captures[1], store);
    }
    if !EMBEDDED.is_match(s) {
        return Ok(Value::String(s.to_string()));
    }

    let mut resolved = String::with_capacity(s.len());
    let mut last = 0;
    for captures in EMBEDDED.captures_iter(s) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        resolved.push_str(&s[last..whole.start()]);
        resolved.push_str(&stringify(&resolve_expression(&captures[1], store)?));
        last = whole.end();
    }
    resolved.push_str(&s[last..]);
    Ok(Value::String(resolved))
}

/// Resolve the inside of one `{{ ... }}` expression
pub fn resolve_expression(expression: &str, store: &WorkflowDataStore) -> Result<Value, TemplateError> {
    let expression = expression.trim();
    let segments: Vec<&str> = expression.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TemplateError::Malformed(expression.to_string()));
    }

    let (root, rest) = segments
        .split_first()
        .ok_or_else(|| TemplateError::Malformed(expression.to_string()))?;

    match *root {
        "steps" => {
            let (node_name, path) = rest.split_first().ok_or(TemplateError::MissingNodeName)?;
            let Some(step) = store.step(node_name) else {
                debug!(node = node_name, "Template references a step that has not run");
                return Ok(Value::Null);
            };
            if !step.is_success() {
                debug!(node = node_name, status = ?step.status, "Template references an unsuccessful step");
                return Ok(Value::Null);
            }
            let path = match path.split_first() {
                Some((&LEGACY_OUTPUT_SEGMENT, tail)) => tail,
                _ => path,
            };
            Ok(navigate(&step.output.to_value(), path))
        }
        "trigger" => {
            let trigger = store.trigger().ok_or(TemplateError::TriggerNotSet)?;
            Ok(navigate(trigger, rest))
        }
        "variables" => {
            let (name, path) = rest.split_first().ok_or(TemplateError::MissingVariableName)?;
            Ok(store
                .variable(name)
                .map(|value| navigate(value, path))
                .unwrap_or(Value::Null))
        }
        "loops" => {
            let (loop_id, path) = rest.split_first().ok_or(TemplateError::MissingLoopName)?;
            Ok(store
                .loop_context(loop_id)
                .map(|context| navigate(&context.to_value(), path))
                .unwrap_or(Value::Null))
        }
        other => Err(TemplateError::InvalidRoot(other.to_string())),
    }
}

/// Walk `path` into `value`; numeric segments index arrays
fn navigate(value: &Value, path: &[&str]) -> Value {
    let mut current = value;
    for segment in path {
        let next = match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Render a value for string interpolation; null renders as empty
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::datastore::{ExecutionMetadata, NodeOutput, StepOutput, StepStatus};

    fn store() -> WorkflowDataStore {
        WorkflowDataStore::new(ExecutionMetadata::new(Uuid::now_v7(), Uuid::now_v7(), 1))
    }

    fn step(name: &str, status: StepStatus, output: Value) -> StepOutput {
        let data = match output {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        StepOutput {
            node_id: Uuid::now_v7(),
            node_name: name.to_string(),
            status,
            output: NodeOutput::Data(data),
            executed_at: Utc::now(),
            duration_ms: 3,
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_trigger_interpolation() {
        let mut store = store();
        store
            .set_trigger(json!({"entity": {"name": "Acme Corp"}}))
            .unwrap();

        let resolved = resolve_str("Welcome to {{ trigger.entity.name }}!", &store).unwrap();
        assert_eq!(resolved, json!("Welcome to Acme Corp!"));
    }

    #[test]
    fn test_full_template_preserves_type() {
        let mut store = store();
        store.record_step(step("get_count", StepStatus::Completed, json!({"totalCount": 50})));

        assert_eq!(
            resolve_str("{{ steps.get_count.totalCount }}", &store).unwrap(),
            json!(50)
        );
        assert_eq!(
            resolve_str("{{steps.get_count}}", &store).unwrap(),
            json!({"totalCount": 50})
        );
    }

    #[test]
    fn test_legacy_output_path_is_equivalent() {
        let mut store = store();
        store.record_step(step(
            "lookup",
            StepStatus::Completed,
            json!({"entity": {"id": 7}, "tags": ["a", "b"]}),
        ));

        for field in ["entity.id", "tags.1", "tags", "missing"] {
            let modern = resolve_expression(&format!("steps.lookup.{field}"), &store).unwrap();
            let legacy = resolve_expression(&format!("steps.lookup.output.{field}"), &store).unwrap();
            assert_eq!(modern, legacy, "field {field}");
        }
        assert_eq!(
            resolve_expression("steps.lookup.tags.1", &store).unwrap(),
            json!("b")
        );
    }

    #[test]
    fn test_missing_data_degrades_to_null() {
        let mut store = store();
        store.record_step(step("failed", StepStatus::Failed, json!({"x": 1})));

        assert_eq!(resolve_str("{{ variables.missing }}", &store).unwrap(), Value::Null);
        assert_eq!(
            resolve_str("{{ steps.missing_node.output }}", &store).unwrap(),
            Value::Null
        );
        assert_eq!(resolve_str("{{ steps.failed.x }}", &store).unwrap(), Value::Null);
        assert_eq!(resolve_str("{{ loops.nope.currentItem }}", &store).unwrap(), Value::Null);
        assert_eq!(resolve_str("id={{ variables.missing }}", &store).unwrap(), json!("id="));
    }

    #[test]
    fn test_trigger_not_set_raises() {
        let err = resolve_str("{{ trigger.x }}", &store()).unwrap_err();
        assert_eq!(err, TemplateError::TriggerNotSet);
        assert_eq!(
            err.to_string(),
            "Trigger not set. Cannot resolve {{ trigger.* }}"
        );
    }

    #[test]
    fn test_root_errors() {
        let store = store();
        let err = resolve_str("{{ env.HOME }}", &store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid root segment 'env'. Must be: steps, trigger, variables, loops"
        );
        assert_eq!(resolve_str("{{ steps }}", &store).unwrap_err(), TemplateError::MissingNodeName);
        assert!(resolve_str("{{ steps }}", &store)
            .unwrap_err()
            .to_string()
            .contains("must include node name"));
        assert_eq!(
            resolve_str("{{ variables }}", &store).unwrap_err(),
            TemplateError::MissingVariableName
        );
        assert_eq!(resolve_str("{{ loops }}", &store).unwrap_err(), TemplateError::MissingLoopName);
        assert!(matches!(
            resolve_str("{{ steps..x }}", &store).unwrap_err(),
            TemplateError::Malformed(_)
        ));
    }

    #[test]
    fn test_variables_and_loops() {
        let mut store = store();
        store.set_variable("threshold", json!({"value": 10}));
        store.enter_loop("rows", &[json!({"id": 1}), json!({"id": 2})]);

        assert_eq!(
            resolve_str("{{ variables.threshold.value }}", &store).unwrap(),
            json!(10)
        );
        assert_eq!(
            resolve_str("{{ loops.rows.currentItem.id }}", &store).unwrap(),
            json!(1)
        );
        assert_eq!(
            resolve_str("{{ loops.rows.currentIndex }}/{{ loops.rows.totalItems }}", &store).unwrap(),
            json!("0/2")
        );
    }

    #[test]
    fn test_resolve_all_without_templates_is_identity() {
        let config = object(json!({
            "name": "plain",
            "count": 3,
            "enabled": false,
            "nothing": null,
            "nested": {"list": [1, "two", {"three": 3.5}]}
        }));
        assert_eq!(resolve_all(&config, &store()).unwrap(), config);
    }

    #[test]
    fn test_resolve_all_walks_nested_structures() {
        let mut store = store();
        store.set_trigger(json!({"id": 42, "name": "Acme"})).unwrap();

        let config = object(json!({
            "entityId": "{{ trigger.id }}",
            "payload": {"title": "Hello {{ trigger.name }}", "tags": ["{{ trigger.name }}", 1]},
            "limit": 5
        }));
        let resolved = resolve_all(&config, &store).unwrap();
        assert_eq!(
            Value::Object(resolved),
            json!({
                "entityId": 42,
                "payload": {"title": "Hello Acme", "tags": ["Acme", 1]},
                "limit": 5
            })
        );
    }

    #[test]
    fn test_stringify_non_strings() {
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
        assert!(contains_template("x {{ a.b }}"));
        assert!(!contains_template("x { a.b }"));
    }
}
