//! Declared result schemas.
//!
//! An [`OutputSpec`] is advertised to the model as one extra tool,
//! [`FINAL_RESULT_TOOL`]; the run ends when the model calls it with a payload
//! that validates. An invalid payload never leaves the run loop: it is turned
//! into a retry with the precise violation fed back to the model.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{OutputError, SchemaError};
use crate::schema;

/// Name of the synthetic tool the model calls to finish a structured run.
pub const FINAL_RESULT_TOOL: &str = "final_result";

#[derive(Clone, Debug)]
pub struct OutputSpec {
    description: String,
    json_schema: Value,
}

impl OutputSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
        }
    }

    pub fn with_schema(mut self, json_schema: Value) -> Result<Self, SchemaError> {
        schema::validate_schema(&json_schema)?;
        self.json_schema = json_schema;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        FINAL_RESULT_TOOL
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Checks a candidate final result against the declared schema.
    ///
    /// Every declared field constraint must hold before a value is surfaced;
    /// a partially-valid result is reported as the first violation found.
    pub fn validate(&self, value: &Value) -> Result<(), OutputError> {
        schema::check_object(&self.json_schema, value).map_err(OutputError::from)
    }
}

/// Deserializes a validated final result into the caller's type.
pub fn parse_output<T>(value: Value) -> Result<T, OutputError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|err| OutputError::Deserialize(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn support_output() -> OutputSpec {
        OutputSpec::new("The structured support verdict for the customer")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "support_advice": {"type": "string"},
                    "block_card": {"type": "boolean"},
                    "risk": {"type": "integer", "minimum": 0, "maximum": 10}
                },
                "required": ["support_advice", "block_card", "risk"],
                "additionalProperties": false
            }))
            .expect("schema valid")
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct SupportResult {
        support_advice: String,
        block_card: bool,
        risk: i64,
    }

    #[test]
    fn valid_result_validates_and_parses() {
        let value = json!({
            "support_advice": "Your balance is $133.45.",
            "block_card": false,
            "risk": 1
        });

        support_output().validate(&value).expect("valid");
        let parsed: SupportResult = parse_output(value).expect("parses");
        assert_eq!(
            parsed,
            SupportResult {
                support_advice: "Your balance is $133.45.".to_string(),
                block_card: false,
                risk: 1,
            }
        );
    }

    #[test]
    fn risk_above_scale_is_rejected() {
        let value = json!({
            "support_advice": "ok",
            "block_card": true,
            "risk": 11
        });

        let err = support_output().validate(&value).expect_err("must fail");
        assert!(matches!(err, OutputError::OutOfBounds { ref field, .. } if field == "risk"));
        assert!(err.to_string().contains("between 0 and 10"));
    }

    #[test]
    fn missing_field_is_rejected() {
        let value = json!({"support_advice": "ok", "risk": 0});
        let err = support_output().validate(&value).expect_err("must fail");
        assert!(matches!(err, OutputError::MissingField(ref field) if field == "block_card"));
    }

    #[test]
    fn spec_name_is_the_final_result_tool() {
        assert_eq!(support_output().name(), FINAL_RESULT_TOOL);
    }
}
