//! # Flatland - JSON Normalization Toolkit
//!
//! Turns nested JSON documents into flat, relational tables: a main table of
//! flattened rows plus one relation table per array of records, each row
//! linked to its owner through a foreign key.
//!
//! ## Modules
//!
//! - **normalize**: flattening, relation extraction, null/key alignment,
//!   deduplication and the pipeline that chains them
//! - **schema**: schema-driven type casting and record validation
//! - **naming**: key naming conventions
//! - **config**: run options
//!
//! ## Quick Start
//!
//! ```rust
//! use flatland::{normalize_json, NormalizeConfig, Normalizer};
//! use serde_json::json;
//!
//! # fn main() -> flatland::Result<()> {
//! let data = json!({
//!     "id": 1,
//!     "user": {"name": "Alice"},
//!     "posts": [
//!         {"id": 10, "title": "First Post"},
//!         {"id": 11, "title": "Second Post"}
//!     ]
//! });
//!
//! let result = normalize_json(&data)?;
//! // result.main = [{"id": 1, "user.name": "Alice"}]
//! // result.relations["posts_table"] = 2 rows with parent_id = 1
//! assert_eq!(result.relations.get("posts_table").unwrap().len(), 2);
//!
//! let normalizer = Normalizer::new(NormalizeConfig {
//!     separator: "__".into(),
//!     ..Default::default()
//! })?;
//! let result = normalizer.normalize(&data)?;
//! assert!(result.main[0].contains_key("user__name"));
//! # Ok(())
//! # }
//! ```

use anyhow::Context;
use serde_json::Value;
use std::io::BufRead;

pub mod config;
pub mod error;
pub mod naming;
pub mod normalize;
pub mod schema;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{default_config, ErrorStrategy, KeepPolicy, KeyConvention, NormalizeConfig, OutputFormat};
pub use error::{ErrorHandler, NormalizeError, Result, TypeCastError};
pub use normalize::{Normalizer, SingleWriter, TableFormat, TableWriter};
pub use types::{Normalized, NormalizedOutput, Record, Relations, Table};

/// Normalize one document or batch with the default configuration
pub fn normalize_json(document: &Value) -> Result<Normalized> {
    normalize_json_with(document, default_config())
}

pub fn normalize_json_with(document: &Value, config: &NormalizeConfig) -> Result<Normalized> {
    Normalizer::new(config.clone())?.normalize(document)
}

/// Normalize a newline-delimited JSON stream as one batch
pub fn normalize_ndjson<R: BufRead>(reader: R, config: &NormalizeConfig) -> anyhow::Result<Normalized> {
    let mut documents = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSON on line {}", number + 1))?;
        documents.push(value);
    }

    let normalized = normalize_json_with(&Value::Array(documents), config)?;
    Ok(normalized)
}
