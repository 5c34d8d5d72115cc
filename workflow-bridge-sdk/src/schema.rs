//! Typed schema nodes and the shared parameter validator.
//!
//! Remote workflow definitions carry a JSON-Schema-like `inputSchema`. Instead
//! of validating against loose `Value` trees, each declared property is
//! deserialised into a tagged [`PropertySchema`] variant and checked by one
//! recursive routine. Both the tool registry and the tool generator call
//! [`validate_parameters`], so the two call sites cannot drift apart.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{BridgeError, Result};

/// Schema node for a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertySchema {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
        #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Box<PropertySchema>>,
        #[serde(rename = "minItems", default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        #[serde(rename = "maxItems", default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<BTreeMap<String, PropertySchema>>,
    },
}

/// Top-level input schema of a workflow or tool.
///
/// `kind` must be `"object"` and `properties` must be present for the schema
/// to be usable; both are checked by the definition validators, not here, so
/// malformed remote definitions produce precise errors instead of serde noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Default for InputSchema {
    fn default() -> Self {
        InputSchema {
            kind: "object".to_string(),
            properties: None,
            required: None,
        }
    }
}

impl InputSchema {
    pub fn object(
        properties: BTreeMap<String, PropertySchema>,
        required: Option<Vec<String>>,
    ) -> Self {
        InputSchema {
            kind: "object".to_string(),
            properties: Some(properties),
            required,
        }
    }

    pub fn is_object_schema(&self) -> bool {
        self.kind == "object" && self.properties.is_some()
    }
}

/// Validate `params` against `schema`.
///
/// Checks required-field presence, then every supplied parameter that has a
/// declared schema. Returns the names of parameters with no declared schema;
/// the caller warns about those instead of failing, so schema drift on the
/// remote side never rejects a call by itself.
pub fn validate_parameters(schema: &InputSchema, params: &Map<String, Value>) -> Result<Vec<String>> {
    let properties = schema
        .properties
        .as_ref()
        .ok_or_else(|| BridgeError::validation("input schema has no properties object"))?;

    if let Some(required) = &schema.required {
        for name in required {
            if !params.contains_key(name) {
                return Err(BridgeError::validation(format!(
                    "missing required parameter '{name}'"
                )));
            }
        }
    }

    let mut undeclared = Vec::new();
    for (name, value) in params {
        match properties.get(name) {
            Some(property) => validate_value(name, property, value)?,
            None => undeclared.push(name.clone()),
        }
    }

    Ok(undeclared)
}

fn validate_value(name: &str, schema: &PropertySchema, value: &Value) -> Result<()> {
    match schema {
        PropertySchema::String {
            allowed,
            min_length,
            max_length,
            pattern,
            ..
        } => {
            let text = value.as_str().ok_or_else(|| type_mismatch(name, "string", value))?;
            if let Some(allowed) = allowed {
                if !allowed.iter().any(|candidate| candidate == text) {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be one of [{}]",
                        allowed.join(", ")
                    )));
                }
            }
            if let Some(min) = min_length {
                if text.chars().count() < *min {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be at least {min} characters"
                    )));
                }
            }
            if let Some(max) = max_length {
                if text.chars().count() > *max {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be at most {max} characters"
                    )));
                }
            }
            if let Some(pattern) = pattern {
                let regex = Regex::new(pattern).map_err(|e| {
                    BridgeError::validation(format!(
                        "parameter '{name}' has an invalid pattern constraint: {e}"
                    ))
                })?;
                if !regex.is_match(text) {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' does not match pattern '{pattern}'"
                    )));
                }
            }
        }
        PropertySchema::Number { minimum, maximum, .. } => {
            let number = value.as_f64().ok_or_else(|| type_mismatch(name, "number", value))?;
            if let Some(min) = minimum {
                if number < *min {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be >= {min}"
                    )));
                }
            }
            if let Some(max) = maximum {
                if number > *max {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be <= {max}"
                    )));
                }
            }
        }
        PropertySchema::Integer { minimum, maximum, .. } => {
            let number = value.as_i64().ok_or_else(|| type_mismatch(name, "integer", value))?;
            if let Some(min) = minimum {
                if number < *min {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be >= {min}"
                    )));
                }
            }
            if let Some(max) = maximum {
                if number > *max {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must be <= {max}"
                    )));
                }
            }
        }
        PropertySchema::Boolean { .. } => {
            if !value.is_boolean() {
                return Err(type_mismatch(name, "boolean", value));
            }
        }
        PropertySchema::Array {
            items,
            min_items,
            max_items,
            ..
        } => {
            let elements = value.as_array().ok_or_else(|| type_mismatch(name, "array", value))?;
            if let Some(min) = min_items {
                if elements.len() < *min {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must have at least {min} items"
                    )));
                }
            }
            if let Some(max) = max_items {
                if elements.len() > *max {
                    return Err(BridgeError::validation(format!(
                        "parameter '{name}' must have at most {max} items"
                    )));
                }
            }
            if let Some(item_schema) = items {
                for (index, element) in elements.iter().enumerate() {
                    validate_value(&format!("{name}[{index}]"), item_schema, element)?;
                }
            }
        }
        PropertySchema::Object { .. } => {
            if !value.is_object() {
                return Err(type_mismatch(name, "object", value));
            }
        }
    }

    Ok(())
}

fn type_mismatch(name: &str, expected: &str, value: &Value) -> BridgeError {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    BridgeError::validation(format!(
        "parameter '{name}' must be of type {expected}, got {actual}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url_schema() -> InputSchema {
        let mut properties = BTreeMap::new();
        properties.insert(
            "url".to_string(),
            PropertySchema::String {
                description: None,
                allowed: None,
                min_length: Some(1),
                max_length: None,
                pattern: Some("^https?://".to_string()),
            },
        );
        properties.insert(
            "depth".to_string(),
            PropertySchema::Integer {
                description: None,
                minimum: Some(1),
                maximum: Some(10),
            },
        );
        InputSchema::object(properties, Some(vec!["url".to_string()]))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn accepts_valid_parameters() {
        let unknown =
            validate_parameters(&url_schema(), &params(json!({"url": "https://a.com", "depth": 3})))
                .unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn rejects_missing_required_parameter() {
        let err = validate_parameters(&url_schema(), &params(json!({"depth": 3}))).unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn rejects_type_mismatch_naming_the_parameter() {
        let err = validate_parameters(&url_schema(), &params(json!({"url": 42}))).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'url'"));
        assert!(text.contains("string"));
    }

    #[test]
    fn rejects_pattern_violation() {
        let err =
            validate_parameters(&url_schema(), &params(json!({"url": "ftp://a.com"}))).unwrap_err();
        assert!(err.to_string().contains("pattern"));
    }

    #[test]
    fn rejects_integer_out_of_range() {
        let err =
            validate_parameters(&url_schema(), &params(json!({"url": "http://a", "depth": 99})))
                .unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn rejects_float_for_integer_property() {
        let err =
            validate_parameters(&url_schema(), &params(json!({"url": "http://a", "depth": 1.5})))
                .unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn enum_membership_is_enforced() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "mode".to_string(),
            PropertySchema::String {
                description: None,
                allowed: Some(vec!["fast".to_string(), "full".to_string()]),
                min_length: None,
                max_length: None,
                pattern: None,
            },
        );
        let schema = InputSchema::object(properties, None);
        assert!(validate_parameters(&schema, &params(json!({"mode": "fast"}))).is_ok());
        let err = validate_parameters(&schema, &params(json!({"mode": "slow"}))).unwrap_err();
        assert!(err.to_string().contains("one of"));
    }

    #[test]
    fn array_items_are_validated_recursively() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "tags".to_string(),
            PropertySchema::Array {
                description: None,
                items: Some(Box::new(PropertySchema::String {
                    description: None,
                    allowed: None,
                    min_length: Some(1),
                    max_length: None,
                    pattern: None,
                })),
                min_items: Some(1),
                max_items: Some(3),
            },
        );
        let schema = InputSchema::object(properties, None);

        assert!(validate_parameters(&schema, &params(json!({"tags": ["a", "b"]}))).is_ok());

        let err = validate_parameters(&schema, &params(json!({"tags": []}))).unwrap_err();
        assert!(err.to_string().contains("at least 1"));

        let err = validate_parameters(&schema, &params(json!({"tags": ["a", 7]}))).unwrap_err();
        assert!(err.to_string().contains("tags[1]"));
    }

    #[test]
    fn undeclared_parameters_are_returned_not_rejected() {
        let unknown = validate_parameters(
            &url_schema(),
            &params(json!({"url": "http://a", "surprise": true})),
        )
        .unwrap();
        assert_eq!(unknown, vec!["surprise".to_string()]);
    }

    #[test]
    fn missing_properties_object_fails() {
        let schema = InputSchema::default();
        let err = validate_parameters(&schema, &Map::new()).unwrap_err();
        assert!(err.to_string().contains("properties"));
    }

    #[test]
    fn schema_nodes_deserialize_from_json_schema_objects() {
        let schema: PropertySchema = serde_json::from_value(json!({
            "type": "string",
            "enum": ["a", "b"],
            "minLength": 1,
            "description": "pick one"
        }))
        .unwrap();
        match schema {
            PropertySchema::String { allowed, min_length, .. } => {
                assert_eq!(allowed.unwrap().len(), 2);
                assert_eq!(min_length, Some(1));
            }
            other => panic!("expected string schema, got {other:?}"),
        }
    }
}
