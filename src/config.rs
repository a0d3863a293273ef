//! Normalization options.
//!
//! A [`NormalizeConfig`] is passed explicitly to every entry point. A single
//! process-wide default, built once on first use, backs the convenience
//! functions in the crate root and is never mutated.

use crate::error::{NormalizeError, Result};
use crate::normalize::flatten::FlattenOptions;
use crate::schema::{TypeSchema, ValidationSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Naming convention applied to every output key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyConvention {
    /// `userName` -> `user_name` (default)
    #[default]
    Snake,
    /// `user_name` -> `userName`
    Camel,
    /// Leave keys untouched
    Keep,
}

/// What to do when a recoverable error occurs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    /// Propagate the error to the caller
    Raise,
    /// Log a warning and skip the offending unit (default)
    #[default]
    Warn,
    /// Continue silently
    Skip,
}

/// Which duplicate survives deduplication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    #[default]
    First,
    /// Later content wins; the row keeps its first position
    Last,
}

/// Shape of the assembled result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `{main, relations}` record sets (default)
    #[default]
    Relational,
    /// Column-aligned tables, `main` first
    Tabular,
    /// Main records only
    Records,
}

fn unknown_option(kind: &str, value: &str, expected: &str) -> NormalizeError {
    NormalizeError::Configuration(format!(
        "unsupported {kind} '{value}', expected one of: {expected}"
    ))
}

impl FromStr for KeyConvention {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snake" => Ok(KeyConvention::Snake),
            "camel" => Ok(KeyConvention::Camel),
            "keep" => Ok(KeyConvention::Keep),
            _ => Err(unknown_option("key convention", s, "snake, camel, keep")),
        }
    }
}

impl FromStr for ErrorStrategy {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" => Ok(ErrorStrategy::Raise),
            "warn" => Ok(ErrorStrategy::Warn),
            "skip" => Ok(ErrorStrategy::Skip),
            _ => Err(unknown_option("error strategy", s, "raise, warn, skip")),
        }
    }
}

impl FromStr for KeepPolicy {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(KeepPolicy::First),
            "last" => Ok(KeepPolicy::Last),
            _ => Err(unknown_option("keep policy", s, "first, last")),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" => Ok(OutputFormat::Relational),
            "tabular" => Ok(OutputFormat::Tabular),
            "records" => Ok(OutputFormat::Records),
            _ => Err(unknown_option("output format", s, "relational, tabular, records")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Relational => "relational",
            OutputFormat::Tabular => "tabular",
            OutputFormat::Records => "records",
        };
        f.write_str(name)
    }
}

/// Deduplication rule for one relation table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DedupRule {
    /// Fields forming the key; the whole record when absent
    pub key_fields: Option<Vec<String>>,
    pub keep: KeepPolicy,
}

/// Options for a normalization run.
///
/// ```json
/// {
///   "separator": ".",
///   "explode_arrays": true,
///   "key_convention": "keep",
///   "remove_duplicates": true,
///   "dedup_rules": {"posts_table": {"key_fields": ["id"], "keep": "last"}},
///   "null_value": "N/A"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Separator between key path segments (default: `"."`)
    pub separator: String,

    /// Emit one row per element of arrays of scalars
    pub explode_arrays: bool,

    /// Flatten one level of sub-lists before handling an array
    pub flatten_nested_arrays: bool,

    /// Lift arrays of records into relation tables (default: true)
    pub extract_relations: bool,

    pub key_convention: KeyConvention,

    /// Deduplicate the main table and every relation table
    pub remove_duplicates: bool,

    /// Survivor policy for main-table deduplication
    pub keep: KeepPolicy,

    /// Key fields for main-table deduplication; whole record when absent
    pub dedup_key_fields: Option<Vec<String>>,

    /// Per-relation-table deduplication rules
    pub dedup_rules: HashMap<String, DedupRule>,

    /// Maximum nesting depth before processing fails (default: 10)
    pub max_nesting_depth: usize,

    pub error_strategy: ErrorStrategy,

    /// Name of the injected foreign key (default: `"parent_id"`)
    pub foreign_key_name: String,

    /// Sentinel written in place of null on output; null is kept when absent
    pub null_value: Option<Value>,

    pub output_format: OutputFormat,

    /// Key path -> target type, applied to the main table
    pub type_schema: Option<TypeSchema>,

    /// Key path -> constraints, applied to the main table
    pub validation_schema: Option<ValidationSchema>,

    /// Process the documents of a batch on the rayon pool
    pub parallel: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            separator: String::from("."),
            explode_arrays: false,
            flatten_nested_arrays: false,
            extract_relations: true,
            key_convention: KeyConvention::default(),
            remove_duplicates: false,
            keep: KeepPolicy::default(),
            dedup_key_fields: None,
            dedup_rules: HashMap::new(),
            max_nesting_depth: 10,
            error_strategy: ErrorStrategy::default(),
            foreign_key_name: String::from("parent_id"),
            null_value: None,
            output_format: OutputFormat::default(),
            type_schema: None,
            validation_schema: None,
            parallel: false,
        }
    }
}

static DEFAULT_CONFIG: Lazy<NormalizeConfig> = Lazy::new(NormalizeConfig::default);

/// The process-wide default configuration
pub fn default_config() -> &'static NormalizeConfig {
    &DEFAULT_CONFIG
}

impl NormalizeConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NormalizeConfig = serde_json::from_str(json)
            .map_err(|e| NormalizeError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(NormalizeError::Configuration(
                "separator must not be empty".into(),
            ));
        }
        if self.max_nesting_depth == 0 {
            return Err(NormalizeError::Configuration(
                "max_nesting_depth must be at least 1".into(),
            ));
        }
        if self.foreign_key_name.is_empty() {
            return Err(NormalizeError::Configuration(
                "foreign_key_name must not be empty".into(),
            ));
        }
        if let Some(fields) = &self.dedup_key_fields {
            if fields.is_empty() {
                return Err(NormalizeError::Configuration(
                    "dedup_key_fields must name at least one field".into(),
                ));
            }
        }
        for (table, rule) in &self.dedup_rules {
            if rule.key_fields.as_ref().is_some_and(|f| f.is_empty()) {
                return Err(NormalizeError::Configuration(format!(
                    "dedup rule for '{table}' must name at least one key field"
                )));
            }
        }
        Ok(())
    }

    pub fn flatten_options(&self) -> FlattenOptions {
        FlattenOptions {
            separator: self.separator.clone(),
            explode_arrays: self.explode_arrays,
            flatten_nested_arrays: self.flatten_nested_arrays,
            max_depth: self.max_nesting_depth,
        }
    }
}
