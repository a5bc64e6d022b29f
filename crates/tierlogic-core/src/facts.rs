//! Applicant facts and the schema that types them.
//!
//! Facts arrive as a structured record (a JSON object keyed by the record
//! keys of a [`FactSchema`]). They are validated once, converted into typed
//! [`FactValue`]s and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::CompiledSchema;

/// Subject atom used when the caller does not name one.
pub const DEFAULT_SUBJECT: &str = "applicant";

/// Errors raised while validating or typing an inbound fact record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Fact record must be a JSON object")]
    NotAnObject,

    #[error("Missing required fact: {key}")]
    MissingKey { key: String },

    #[error("Unknown fact: {key}")]
    UnknownKey { key: String },

    #[error("Invalid value for fact '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid subject atom: {0}")]
    InvalidSubject(String),

    #[error("Fact schema could not be compiled: {0}")]
    SchemaUnavailable(String),
}

/// Type of a single fact field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Whole number with optional inclusive bounds.
    Integer { min: Option<i64>, max: Option<i64> },

    /// Integer or float with optional inclusive bounds.
    Number { min: Option<f64>, max: Option<f64> },

    /// One of a fixed set of lowercase atoms.
    Symbol { allowed: Vec<String> },

    Boolean,
}

/// One field of a fact schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Key in the inbound record (e.g. `creditScore`)
    pub key: String,

    /// Solver predicate the fact is asserted under (e.g. `credit_score`)
    pub predicate: String,

    /// Value type
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn integer(key: &str, predicate: &str, min: Option<i64>, max: Option<i64>) -> Self {
        Self {
            key: key.to_string(),
            predicate: predicate.to_string(),
            kind: FieldKind::Integer { min, max },
        }
    }

    pub fn number(key: &str, predicate: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            key: key.to_string(),
            predicate: predicate.to_string(),
            kind: FieldKind::Number { min, max },
        }
    }

    pub fn symbol(key: &str, predicate: &str, allowed: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            predicate: predicate.to_string(),
            kind: FieldKind::Symbol {
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    pub fn boolean(key: &str, predicate: &str) -> Self {
        Self {
            key: key.to_string(),
            predicate: predicate.to_string(),
            kind: FieldKind::Boolean,
        }
    }
}

/// Ordered set of required fact fields.
///
/// The compiled JSON Schema is built lazily on first validation and reused
/// for the lifetime of the schema, so share one `FactSchema` across requests.
pub struct FactSchema {
    name: String,
    fields: Vec<FieldSpec>,
    compiled: CompiledSchema,
}

impl FactSchema {
    /// Create a schema from its fields. Field order is the encoding order.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
            compiled: CompiledSchema::default(),
        }
    }

    /// The loan application schema the default rule set is written against.
    pub fn loan_application() -> Self {
        Self::new(
            "loan_application",
            vec![
                FieldSpec::integer("age", "age", Some(0), Some(130)),
                FieldSpec::number("income", "income", Some(0.0), None),
                FieldSpec::integer("creditScore", "credit_score", Some(300), Some(850)),
                FieldSpec::symbol(
                    "employmentStatus",
                    "employment_status",
                    &[
                        "permanent",
                        "contract",
                        "self_employed",
                        "part_time",
                        "unemployed",
                        "retired",
                    ],
                ),
                FieldSpec::number("employmentYears", "employment_years", Some(0.0), None),
                FieldSpec::number("debtRatio", "debt_ratio", Some(0.0), None),
                FieldSpec::number("loanAmount", "loan_amount", Some(0.0), None),
                FieldSpec::symbol(
                    "loanPurpose",
                    "loan_purpose",
                    &[
                        "mortgage",
                        "auto",
                        "education",
                        "home_improvement",
                        "debt_consolidation",
                        "business",
                        "personal",
                    ],
                ),
                FieldSpec::number("propertyValue", "property_value", Some(0.0), None),
                FieldSpec::number("savings", "savings", Some(0.0), None),
                FieldSpec::number("investments", "investments", Some(0.0), None),
                FieldSpec::integer("latePayments", "late_payments", Some(0), None),
                FieldSpec::integer("bankruptcies", "bankruptcies", Some(0), None),
                FieldSpec::integer("defaults", "defaults", Some(0), None),
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by record key.
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Validate a record against the compiled JSON Schema.
    pub fn validate(&self, record: &Value) -> Result<(), SchemaError> {
        self.compiled.validate(&self.fields, record)
    }
}

impl fmt::Debug for FactSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A typed scalar fact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Symbol(String),
}

impl FactValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FactValue::Integer(i) => Some(*i as f64),
            FactValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Immutable facts about one subject under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicantFacts {
    subject: String,
    values: BTreeMap<String, FactValue>,
    /// (record key, predicate) in schema order, used for encoding
    #[serde(skip)]
    layout: Vec<(String, String)>,
}

impl ApplicantFacts {
    /// Validate and type a JSON record for the default subject.
    pub fn from_json(record: &Value, schema: &FactSchema) -> Result<Self, SchemaError> {
        Self::from_json_for(DEFAULT_SUBJECT, record, schema)
    }

    /// Validate and type a JSON record for a named subject.
    pub fn from_json_for(
        subject: &str,
        record: &Value,
        schema: &FactSchema,
    ) -> Result<Self, SchemaError> {
        if !crate::encoder::is_plain_atom(subject) {
            return Err(SchemaError::InvalidSubject(subject.to_string()));
        }

        schema.validate(record)?;
        let object = record.as_object().ok_or(SchemaError::NotAnObject)?;

        let mut values = BTreeMap::new();
        let mut layout = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            let raw = object.get(&field.key).ok_or_else(|| SchemaError::MissingKey {
                key: field.key.clone(),
            })?;
            values.insert(field.key.clone(), type_value(field, raw)?);
            layout.push((field.key.clone(), field.predicate.clone()));
        }

        Ok(Self {
            subject: subject.to_string(),
            values,
            layout,
        })
    }

    /// Start building a record programmatically.
    pub fn builder() -> FactsBuilder {
        FactsBuilder::default()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(predicate, value)` pairs in schema order.
    pub fn predicates(&self) -> impl Iterator<Item = (&str, &FactValue)> {
        self.layout.iter().filter_map(move |(key, predicate)| {
            self.values.get(key).map(|v| (predicate.as_str(), v))
        })
    }
}

fn type_value(field: &FieldSpec, raw: &Value) -> Result<FactValue, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidValue {
        key: field.key.clone(),
        reason: reason.to_string(),
    };

    match &field.kind {
        FieldKind::Integer { .. } => raw
            .as_i64()
            .map(FactValue::Integer)
            .ok_or_else(|| invalid("expected an integer")),
        FieldKind::Number { .. } => {
            if let Some(i) = raw.as_i64() {
                Ok(FactValue::Integer(i))
            } else {
                match raw.as_f64() {
                    Some(n) if n.is_finite() => Ok(FactValue::Number(n)),
                    Some(_) => Err(invalid("expected a finite number")),
                    None => Err(invalid("expected a number")),
                }
            }
        }
        FieldKind::Symbol { allowed } => {
            let s = raw.as_str().ok_or_else(|| invalid("expected a symbol"))?;
            if allowed.iter().any(|a| a == s) {
                Ok(FactValue::Symbol(s.to_string()))
            } else {
                Err(invalid(&format!("'{}' is not one of {:?}", s, allowed)))
            }
        }
        FieldKind::Boolean => raw
            .as_bool()
            .map(FactValue::Boolean)
            .ok_or_else(|| invalid("expected a boolean")),
    }
}

/// Builder for assembling a fact record in code.
#[derive(Debug, Default)]
pub struct FactsBuilder {
    subject: Option<String>,
    record: Map<String, Value>,
}

impl FactsBuilder {
    /// Set the subject atom.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set a fact by record key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record.insert(key.into(), value.into());
        self
    }

    /// Validate against the schema and freeze.
    pub fn build(self, schema: &FactSchema) -> Result<ApplicantFacts, SchemaError> {
        let subject = self.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        ApplicantFacts::from_json_for(&subject, &Value::Object(self.record), schema)
    }
}
