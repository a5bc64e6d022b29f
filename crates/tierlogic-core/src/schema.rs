//! JSON Schema validation for inbound fact records.
//!
//! Each [`FactSchema`](crate::FactSchema) renders itself as a JSON Schema
//! document. The document is compiled on first use and reused afterwards.

use std::sync::OnceLock;

use jsonschema::error::ValidationErrorKind;
use serde_json::{json, Map, Value};

use crate::facts::{FieldKind, FieldSpec, SchemaError};

/// Lazily compiled validator for one fact schema.
#[derive(Default)]
pub(crate) struct CompiledSchema {
    validator: OnceLock<Result<jsonschema::Validator, String>>,
}

impl CompiledSchema {
    fn get(&self, fields: &[FieldSpec]) -> Result<&jsonschema::Validator, SchemaError> {
        let result = self.validator.get_or_init(|| {
            let document = schema_document(fields);
            jsonschema::options()
                .build(&document)
                .map_err(|e| format!("Failed to compile fact schema: {}", e))
        });

        match result {
            Ok(v) => Ok(v),
            Err(e) => Err(SchemaError::SchemaUnavailable(e.clone())),
        }
    }

    /// Validate a record, reporting the first violation.
    pub(crate) fn validate(&self, fields: &[FieldSpec], record: &Value) -> Result<(), SchemaError> {
        if !record.is_object() {
            return Err(SchemaError::NotAnObject);
        }

        let validator = self.get(fields)?;
        let first = validator.iter_errors(record).next();

        match first {
            None => Ok(()),
            Some(error) => Err(match &error.kind {
                ValidationErrorKind::Required { property } => SchemaError::MissingKey {
                    key: property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string()),
                },
                ValidationErrorKind::AdditionalProperties { unexpected } => {
                    SchemaError::UnknownKey {
                        key: unexpected
                            .first()
                            .cloned()
                            .unwrap_or_else(|| "unknown".to_string()),
                    }
                }
                _ => SchemaError::InvalidValue {
                    key: error
                        .instance_path
                        .to_string()
                        .trim_start_matches('/')
                        .to_string(),
                    reason: error.to_string(),
                },
            }),
        }
    }
}

/// Render the JSON Schema document for a list of fields.
pub fn schema_document(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        properties.insert(field.key.clone(), field_schema(&field.kind));
    }

    let required: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": required,
        "properties": properties,
        "additionalProperties": false
    })
}

fn field_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Integer { min, max } => {
            let mut schema = json!({ "type": "integer" });
            if let Some(min) = min {
                schema["minimum"] = json!(min);
            }
            if let Some(max) = max {
                schema["maximum"] = json!(max);
            }
            schema
        }
        FieldKind::Number { min, max } => {
            let mut schema = json!({ "type": "number" });
            if let Some(min) = min {
                schema["minimum"] = json!(min);
            }
            if let Some(max) = max {
                schema["maximum"] = json!(max);
            }
            schema
        }
        FieldKind::Symbol { allowed } => json!({ "type": "string", "enum": allowed }),
        FieldKind::Boolean => json!({ "type": "boolean" }),
    }
}
