//! The subset of JSON Schema used for tool inputs and structured outputs
//!
//! Supported keywords: `type` (a name or a list of names), `properties`,
//! `required`, `items`, `enum` and `additionalProperties: false`. Anything else
//! is accepted without checking.
use serde_json::Value;

/// Check `value` against `schema`, returning the first mismatch found
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|name| matches_type(value, name)) {
            return Err(format!(
                "{}: expected {}, found {}",
                path,
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            return Err(format!("{}: {} is not one of {}", path, value, Value::Array(options.clone())));
        }
    }

    if let Value::Object(object) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    return Err(format!("{}: missing required property '{}'", path, field));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (key, field_value) in object {
            match properties.and_then(|p| p.get(key)) {
                Some(field_schema) => {
                    validate_at(field_value, field_schema, &format!("{}.{}", path, key))?
                }
                None if closed => {
                    return Err(format!("{}: unexpected property '{}'", path, key));
                }
                None => {}
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{}[{}]", path, index))?;
        }
    }

    Ok(())
}

fn matches_type(value: &Value, name: &str) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn allows_null(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(name)) => name == "null",
        Some(Value::Array(names)) => names.iter().any(|name| name == "null"),
        _ => true,
    }
}

/// Drop `null` elements from arrays whose item schema does not admit null.
///
/// Models streaming list outputs regularly leave holes; the surviving
/// elements keep their relative order.
pub fn prune_null_items(value: &mut Value, schema: &Value) {
    match value {
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                if !allows_null(item_schema) {
                    items.retain(|item| !item.is_null());
                }
                for item in items.iter_mut() {
                    prune_null_items(item, item_schema);
                }
            }
        }
        Value::Object(object) => {
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, field_value) in object.iter_mut() {
                    if let Some(field_schema) = properties.get(key) {
                        prune_null_items(field_value, field_schema);
                    }
                }
            }
        }
        _ => {}
    }
}
