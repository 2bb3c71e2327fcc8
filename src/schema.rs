//! Validation for the JSON-schema subset the harness speaks: object roots,
//! per-field types, required lists, `additionalProperties`, and numeric
//! `minimum`/`maximum` bounds.

use serde_json::Value;

use crate::error::{OutputError, SchemaError};

/// A single reason a value failed validation against a schema.
///
/// Kept separate from the error enums so tool-argument checking and
/// final-result checking can report it in their own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotObject,
    MissingField(String),
    UnknownField(String),
    WrongType { field: String, expected: String },
    OutOfBounds { field: String, bound: String },
}

impl Violation {
    pub fn message(&self) -> String {
        match self {
            Violation::NotObject => "value must be a JSON object".to_string(),
            Violation::MissingField(field) => format!("missing required field: {field}"),
            Violation::UnknownField(field) => format!("unknown field: {field}"),
            Violation::WrongType { field, expected } => {
                format!("field '{field}' must be of type {expected}")
            }
            Violation::OutOfBounds { field, bound } => format!("field '{field}' must be {bound}"),
        }
    }
}

impl From<Violation> for OutputError {
    fn from(violation: Violation) -> Self {
        match violation {
            Violation::NotObject => OutputError::NotObject,
            Violation::MissingField(field) => OutputError::MissingField(field),
            Violation::UnknownField(field) => OutputError::UnknownField(field),
            Violation::WrongType { field, expected } => OutputError::WrongType { field, expected },
            Violation::OutOfBounds { field, bound } => OutputError::OutOfBounds { field, bound },
        }
    }
}

/// Checks that a declared schema is well-formed before it is accepted into a
/// `ToolSpec` or `OutputSpec`.
pub fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        for item in required_arr {
            if !item.is_string() {
                return Err(SchemaError::InvalidRequired);
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (field, field_schema) in properties {
            for bound_key in ["minimum", "maximum"] {
                if let Some(bound) = field_schema.get(bound_key) {
                    if bound.as_f64().is_none() {
                        return Err(SchemaError::InvalidBound(field.clone()));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Validates a candidate object against a schema previously accepted by
/// [`validate_schema`]. Returns the first violation found.
pub fn check_object(schema: &Value, value: &Value) -> Result<(), Violation> {
    let value_obj = value.as_object().ok_or(Violation::NotObject)?;
    let schema_obj = schema.as_object().ok_or(Violation::NotObject)?;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if !value_obj.contains_key(field_name) {
                return Err(Violation::MissingField(field_name.to_string()));
            }
        }
    }

    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if schema_obj
        .get("additionalProperties")
        .and_then(Value::as_bool)
        == Some(false)
    {
        for key in value_obj.keys() {
            if !properties.contains_key(key) {
                return Err(Violation::UnknownField(key.clone()));
            }
        }
    }

    for (key, field_value) in value_obj {
        let Some(field_schema) = properties.get(key) else {
            continue;
        };

        if let Some(type_name) = field_schema.get("type").and_then(Value::as_str) {
            if !value_matches_type(field_value, type_name) {
                return Err(Violation::WrongType {
                    field: key.clone(),
                    expected: type_name.to_string(),
                });
            }
        }

        check_bounds(key, field_schema, field_value)?;
    }

    Ok(())
}

fn check_bounds(field: &str, field_schema: &Value, value: &Value) -> Result<(), Violation> {
    let Some(actual) = value.as_f64() else {
        return Ok(());
    };

    let minimum = field_schema.get("minimum").and_then(Value::as_f64);
    let maximum = field_schema.get("maximum").and_then(Value::as_f64);

    let in_bounds =
        minimum.is_none_or(|min| actual >= min) && maximum.is_none_or(|max| actual <= max);
    if in_bounds {
        return Ok(());
    }

    let bound = match (minimum, maximum) {
        (Some(min), Some(max)) => format!("between {min} and {max}"),
        (Some(min), None) => format!("at least {min}"),
        (None, Some(max)) => format!("at most {max}"),
        (None, None) => return Ok(()),
    };

    Err(Violation::OutOfBounds {
        field: field.to_string(),
        bound,
    })
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
