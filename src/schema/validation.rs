//! Record validation against per-field constraints.

use crate::schema::cast::{parse_date, parse_datetime};
use crate::types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Expected JSON shape of a field. Unrecognised tags accept anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedType {
    Int,
    /// Any number
    Float,
    Str,
    Bool,
    /// A string holding a date or timestamp
    Date,
    List,
    Dict,
    #[serde(other)]
    Any,
}

impl ExpectedType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ExpectedType::Int => value.as_i64().is_some() || value.as_u64().is_some(),
            ExpectedType::Float => value.is_number(),
            ExpectedType::Str => value.is_string(),
            ExpectedType::Bool => value.is_boolean(),
            ExpectedType::Date => value
                .as_str()
                .is_some_and(|s| parse_date(s).is_some() || parse_datetime(s).is_some()),
            ExpectedType::List => value.is_array(),
            ExpectedType::Dict => value.is_object(),
            ExpectedType::Any => true,
        }
    }
}

impl fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpectedType::Int => "int",
            ExpectedType::Float => "float",
            ExpectedType::Str => "str",
            ExpectedType::Bool => "bool",
            ExpectedType::Date => "date",
            ExpectedType::List => "list",
            ExpectedType::Dict => "dict",
            ExpectedType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Constraints on one field
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldConstraint {
    #[serde(rename = "type")]
    pub expected: Option<ExpectedType>,
    /// A null value counts as missing
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub choices: Option<Vec<Value>>,
}

/// Field name -> constraints
pub type ValidationSchema = BTreeMap<String, FieldConstraint>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub fn validate_record(record: &Record, schema: &ValidationSchema) -> ValidationReport {
    let mut errors = Vec::new();

    for (field, constraint) in schema {
        let value = match record.get(field) {
            Some(v) if !v.is_null() => v,
            _ => {
                if constraint.required {
                    errors.push(format!("Missing required field: {field}"));
                }
                continue;
            }
        };

        if let Some(expected) = constraint.expected {
            if !expected.matches(value) {
                errors.push(format!(
                    "Field {field}: expected {expected}, got {}",
                    type_name(value)
                ));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = constraint.min.filter(|min| n < *min) {
                errors.push(format!("Field {field}: value {value} < minimum {min}"));
            }
            if let Some(max) = constraint.max.filter(|max| n > *max) {
                errors.push(format!("Field {field}: value {value} > maximum {max}"));
            }
        }

        if let Some(choices) = &constraint.choices {
            if !choices.contains(value) {
                errors.push(format!(
                    "Field {field}: value {value} not in allowed choices {}",
                    Value::Array(choices.clone())
                ));
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

pub fn validate_records(records: &[Record], schema: &ValidationSchema) -> Vec<ValidationReport> {
    records
        .iter()
        .map(|record| validate_record(record, schema))
        .collect()
}

pub fn filter_valid_records(records: Vec<Record>, schema: &ValidationSchema) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| validate_record(record, schema).valid)
        .collect()
}

/// Aggregate counts over a batch of validation reports.
///
/// An error's type is the text before its first `:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub error_types: BTreeMap<String, usize>,
    pub error_details: Vec<String>,
}

impl ErrorSummary {
    pub fn from_reports(reports: &[ValidationReport]) -> Self {
        let mut summary = ErrorSummary {
            total_records: reports.len(),
            ..Default::default()
        };

        for report in reports {
            if report.valid {
                summary.valid_records += 1;
                continue;
            }
            summary.invalid_records += 1;
            for err in &report.errors {
                let kind = err.split_once(':').map_or("Unknown", |(kind, _)| kind);
                *summary.error_types.entry(kind.to_string()).or_default() += 1;
                summary.error_details.push(err.clone());
            }
        }

        summary
    }
}
