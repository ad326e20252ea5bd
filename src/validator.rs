//! Payload validation against operation schemas.

use serde_json::Value;

use crate::error::{SchemaError, ValidateError};
use crate::types::{Direction, Operation};

/// Status whose response schema is preferred when validating responses.
const SUCCESS_STATUS: &str = "200";

/// Validate a payload against one of an operation's schemas.
///
/// Request payloads use `requestSchema[content_type]`; response payloads use
/// the `200` response, or the first declared status when there is none. When
/// `content_type` is `None` the first schema for that direction is used.
///
/// # Errors
///
/// Returns `ValidateError::MissingSchema` if the operation has no matching
/// schema, or `ValidateError::Invalid` if the payload doesn't match it.
pub fn validate_payload(
    operation: &Operation,
    payload: &Value,
    direction: Direction,
    content_type: Option<&str>,
) -> Result<(), ValidateError> {
    let schema = select_schema(operation, direction, content_type).ok_or_else(|| {
        ValidateError::MissingSchema {
            operation: operation.id.clone(),
            direction: match direction {
                Direction::Request => "request",
                Direction::Response => "response",
            },
            content_type: content_type.unwrap_or("any content type").to_string(),
        }
    })?;
    validate_against_schema(schema, payload)
}

fn select_schema<'a>(
    operation: &'a Operation,
    direction: Direction,
    content_type: Option<&str>,
) -> Option<&'a Value> {
    let contents = match direction {
        Direction::Request => operation.request_schema.as_object()?,
        Direction::Response => {
            let responses = operation.response_schemas.as_object()?;
            responses
                .get(SUCCESS_STATUS)
                .or_else(|| responses.values().next())?
                .as_object()?
        }
    };
    match content_type {
        Some(content_type) => contents.get(content_type),
        // Request maps may carry a parameter list next to the bodies.
        None => contents
            .iter()
            .find(|(key, value)| key.as_str() != "parameters" && value.is_object())
            .map(|(_, schema)| schema),
    }
}

/// Validate a payload against a self-contained schema.
///
/// Use this when you already hold the schema and want to validate multiple
/// payloads against it.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ValidateError::InvalidSchema {
        message: e.to_string(),
    })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(payload)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pet_operation() -> Operation {
        let pet = json!({
            "$ref": "#/definitions/Pet",
            "definitions": {
                "Pet": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "age": { "type": "integer" }
                    },
                    "required": ["name", "age"]
                }
            }
        });
        let mut op = Operation::new("spec", "addPet", "POST", "/pets");
        op.request_schema = json!({
            "parameters": [],
            "application/json": pet.clone()
        });
        op.response_schemas = json!({ "201": { "application/json": pet } });
        op
    }

    #[test]
    fn valid_request_payload() {
        let payload = json!({ "name": "Rex", "age": 3 });
        let result = validate_payload(&pet_operation(), &payload, Direction::Request, Some("application/json"));
        assert!(result.is_ok());
    }

    #[test]
    fn default_content_type_skips_parameters() {
        let payload = json!({ "name": "Rex", "age": "three" });
        let result = validate_payload(&pet_operation(), &payload, Direction::Request, None);
        assert!(matches!(result, Err(ValidateError::Invalid { .. })));
    }

    #[test]
    fn response_falls_back_to_first_status() {
        let payload = json!({ "name": "Rex", "age": 3 });
        assert!(validate_payload(&pet_operation(), &payload, Direction::Response, None).is_ok());
    }

    #[test]
    fn missing_schema_is_reported() {
        let payload = json!({});
        let result = validate_payload(&pet_operation(), &payload, Direction::Request, Some("application/xml"));
        match result {
            Err(ValidateError::MissingSchema { operation, content_type, .. }) => {
                assert_eq!(operation, "spec-addPet");
                assert_eq!(content_type, "application/xml");
            }
            other => panic!("expected missing schema, got {:?}", other),
        }
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let payload = json!({});
        match validate_payload(&pet_operation(), &payload, Direction::Request, None) {
            Err(ValidateError::Invalid { errors }) => {
                // one "required" error per missing property
                assert_eq!(errors.len(), 2);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn wrong_type_reports_path() {
        let schema = json!({ "type": "object", "properties": { "name": { "type": "string" } } });
        match validate_against_schema(&schema, &json!({ "name": 123 })) {
            Err(ValidateError::Invalid { errors }) => assert_eq!(errors[0].path, "/name"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
