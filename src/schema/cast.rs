//! Schema-driven type casting.
//!
//! Casting never fails a run: [`cast_record`] keeps the original value of
//! every field it cannot convert and reports the failure.

use crate::error::TypeCastError;
use crate::types::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];
const DATE_TIME_FORMATS_FOR_DATE: &[&str] = &["%Y/%m/%d %H:%M:%S"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];

/// Target type of a schema entry. Unrecognised tags deserialize to
/// `Unknown`, which passes values through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    Int,
    Float,
    Str,
    Bool,
    Date,
    Datetime,
    #[serde(other)]
    Unknown,
}

impl FromStr for CastType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "int" => CastType::Int,
            "float" => CastType::Float,
            "str" => CastType::Str,
            "bool" => CastType::Bool,
            "date" => CastType::Date,
            "datetime" => CastType::Datetime,
            _ => CastType::Unknown,
        })
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastType::Int => "int",
            CastType::Float => "float",
            CastType::Str => "str",
            CastType::Bool => "bool",
            CastType::Date => "date",
            CastType::Datetime => "datetime",
            CastType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Flattened key path -> target type
pub type TypeSchema = HashMap<String, CastType>;

/// Convert `value` to `target`. Null stays null.
pub fn cast_value(value: &Value, target: CastType) -> Result<Value, TypeCastError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match target {
        CastType::Int => cast_int(value),
        CastType::Float => cast_float(value),
        CastType::Str => Ok(Value::String(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        CastType::Bool => Ok(Value::Bool(truthy(value))),
        CastType::Date => {
            let s = expect_str(value, target)?;
            parse_date(s)
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| TypeCastError::new(value, "date", "unrecognised date format"))
        }
        CastType::Datetime => {
            let s = expect_str(value, target)?;
            parse_datetime(s)
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
                .ok_or_else(|| TypeCastError::new(value, "datetime", "unrecognised datetime format"))
        }
        CastType::Unknown => Ok(value.clone()),
    }
}

fn cast_int(value: &Value) -> Result<Value, TypeCastError> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if f.is_finite() && f.abs() < i64::MAX as f64 {
                Ok(Value::from(f.trunc() as i64))
            } else {
                Err(TypeCastError::new(value, "int", "out of range"))
            }
        }
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| TypeCastError::new(value, "int", e.to_string())),
        _ => Err(TypeCastError::new(value, "int", "not a scalar")),
    }
}

fn cast_float(value: &Value) -> Result<Value, TypeCastError> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    f.and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| TypeCastError::new(value, "float", "not a finite number"))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(record) => !record.is_empty(),
    }
}

fn expect_str(value: &Value, target: CastType) -> Result<&str, TypeCastError> {
    value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| TypeCastError::new(value, target.to_string(), "expected a string"))
}

/// Parse a date in one of the accepted layouts
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_TIME_FORMATS_FOR_DATE
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Parse a timestamp in one of the accepted layouts or RFC 3339
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

/// A record after casting, plus the fields that kept their original value
#[derive(Debug, Clone, PartialEq)]
pub struct CastReport {
    pub record: Record,
    pub failures: Vec<(String, TypeCastError)>,
}

impl CastReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cast the fields of `record` named in `schema`; others are copied as-is
pub fn cast_record(record: &Record, schema: &TypeSchema) -> CastReport {
    let mut failures = Vec::new();
    let record = record
        .iter()
        .map(|(key, value)| {
            let cast = match schema.get(key) {
                Some(target) => cast_value(value, *target).unwrap_or_else(|err| {
                    failures.push((key.clone(), err));
                    value.clone()
                }),
                None => value.clone(),
            };
            (key.clone(), cast)
        })
        .collect();

    CastReport { record, failures }
}

/// Infer a schema from the first non-null value seen for every key
pub fn infer_type_schema(records: &[Record]) -> TypeSchema {
    let mut schema = TypeSchema::new();
    for record in records {
        for (key, value) in record {
            if value.is_null() || schema.contains_key(key) {
                continue;
            }
            schema.insert(key.clone(), infer_cast_type(value));
        }
    }
    schema
}

fn infer_cast_type(value: &Value) -> CastType {
    match value {
        Value::Bool(_) => CastType::Bool,
        Value::Number(n) if n.is_i64() || n.is_u64() => CastType::Int,
        Value::Number(_) => CastType::Float,
        Value::String(s) if ISO_DATE_REGEX.is_match(s) => CastType::Date,
        Value::String(s) if ISO_DATETIME_REGEX.is_match(s) => CastType::Datetime,
        _ => CastType::Str,
    }
}
