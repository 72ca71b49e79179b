//! JSON Schema synthesis for method contracts, served by `methods`.

use serde_json::{json, Map, Value};

use crate::service::{ParamInfo, ParamType};

/// Build an object schema from declared parameters.
pub fn params_schema(params: &[ParamInfo]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = type_schema(param.param_type);
        if let Some(default) = &param.default {
            prop.insert("default".to_string(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(prop));

        if param.required {
            required.push(param.name.clone());
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    Value::Object(schema)
}

fn type_schema(param_type: ParamType) -> Map<String, Value> {
    let schema = match param_type {
        ParamType::String => json!({"type": "string"}),
        ParamType::Integer => json!({"type": "integer"}),
        ParamType::Number => json!({"type": "number"}),
        ParamType::Boolean => json!({"type": "boolean"}),
        ParamType::Array => json!({"type": "array"}),
        ParamType::Object => json!({"type": "object"}),
        ParamType::StringList => json!({
            "oneOf": [
                {"type": "string"},
                {"type": "array", "items": {"type": "string"}}
            ]
        }),
        ParamType::Any => json!({}),
    };
    match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_params() {
        let params = vec![
            ParamInfo {
                name: "query".to_string(),
                param_type: ParamType::String,
                required: true,
                default: None,
            },
            ParamInfo {
                name: "limit".to_string(),
                param_type: ParamType::Integer,
                required: false,
                default: Some(json!(20)),
            },
        ];

        let schema = params_schema(&params);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["properties"]["limit"]["default"], 20);
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_empty_params() {
        let schema = params_schema(&[]);
        assert_eq!(schema["properties"], json!({}));
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn test_string_list_schema() {
        let schema = params_schema(&[ParamInfo {
            name: "include".to_string(),
            param_type: ParamType::StringList,
            required: false,
            default: None,
        }]);
        assert_eq!(schema["properties"]["include"]["oneOf"][1]["type"], "array");
    }
}
