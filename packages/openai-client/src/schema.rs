//! JSON schema generation for strict structured outputs.
//!
//! Strict mode rejects schemas with `$ref`, optional properties, or open
//! objects, so the `schemars` output is rewritten before it is sent.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Types that can be requested as structured output.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Strict-mode schema for this type.
    fn openai_schema() -> Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();
        let definitions = value.get("definitions").cloned().unwrap_or(Value::Null);
        make_strict(&mut value, &definitions);
        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Inline `#/definitions/*` references, close every object and list every
/// property as required.
fn make_strict(value: &mut Value, definitions: &Value) {
    let inlined = value
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| definitions.get(reference.trim_start_matches("#/definitions/")));
    if let Some(definition) = inlined {
        *value = definition.clone();
        make_strict(value, definitions);
        return;
    }

    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".into())) {
                map.insert("additionalProperties".into(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys = props.keys().cloned().map(Value::String).collect();
                    map.insert("required".into(), Value::Array(keys));
                }
            }

            for (key, child) in map.iter_mut() {
                if key != "definitions" {
                    make_strict(child, definitions);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                make_strict(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct Estimate {
        low: Option<String>,
        high: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Report {
        business_model: String,
        pain_points: Vec<String>,
        estimate: Estimate,
    }

    #[test]
    fn test_optional_fields_are_required() {
        let schema = Estimate::openai_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"low"));
        assert!(required.contains(&"high"));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_nested_refs_are_inlined() {
        let schema = Report::openai_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
        assert!(schema.get("definitions").is_none());
        assert_eq!(
            schema["properties"]["estimate"]["additionalProperties"],
            false
        );
    }
}
