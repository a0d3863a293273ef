//! Flattening nested documents into flat rows.
//!
//! Nested records are folded into key paths (`user.address.city`). Sibling
//! fields that expand to several rows combine as a cartesian product:
//!
//! ```text
//! {"a": [1, 2], "b": ["x", "y", "z"]}  --explode-->  6 rows
//! {"a": 1, "b": "x"}, {"a": 1, "b": "y"}, ..., {"a": 2, "b": "z"}
//! ```
//!
//! # Depth semantics
//!
//! The document itself sits at depth 0 and every descent into a field adds
//! one. A value deeper than `max_depth` fails with `NestingDepth`.

use crate::error::{NormalizeError, Result};
use crate::types::{is_scalar, Record};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Options for the [`Flattener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenOptions {
    /// Separator between key path segments
    pub separator: String,

    /// Emit one row per element of arrays of scalars
    pub explode_arrays: bool,

    /// Splice sub-lists into their parent list (one level) first
    pub flatten_nested_arrays: bool,

    /// Maximum nesting depth
    pub max_depth: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        FlattenOptions {
            separator: String::from("."),
            explode_arrays: false,
            flatten_nested_arrays: false,
            max_depth: 10,
        }
    }
}

/// Turns one nested document into a list of flat rows
#[derive(Debug, Clone)]
pub struct Flattener {
    options: FlattenOptions,
}

impl Flattener {
    pub fn new(options: FlattenOptions) -> Self {
        Flattener { options }
    }

    pub fn options(&self) -> &FlattenOptions {
        &self.options
    }

    /// Flatten `document` into one or more rows.
    ///
    /// Never returns an empty list: an empty document yields one empty row.
    pub fn flatten(&self, document: &Value) -> Result<Vec<Record>> {
        self.flatten_from(document, 0)
    }

    /// Flatten a value that already sits `depth` levels below its document
    pub(crate) fn flatten_from(&self, value: &Value, depth: usize) -> Result<Vec<Record>> {
        self.flatten_value(value, "", depth)
    }

    fn flatten_value(&self, value: &Value, prefix: &str, depth: usize) -> Result<Vec<Record>> {
        if depth > self.options.max_depth {
            return Err(NormalizeError::NestingDepth {
                depth,
                max: self.options.max_depth,
            });
        }

        let rows = match value {
            Value::Object(obj) => self.flatten_object(obj, prefix, depth)?,
            Value::Array(items) => self.flatten_list(items, prefix),
            scalar => vec![single(prefix, scalar.clone())],
        };

        if rows.is_empty() {
            Ok(vec![Record::new()])
        } else {
            Ok(rows)
        }
    }

    fn flatten_object(
        &self,
        obj: &Map<String, Value>,
        prefix: &str,
        depth: usize,
    ) -> Result<Vec<Record>> {
        let mut rows: Vec<Record> = Vec::new();

        for (key, value) in obj {
            let path = self.key_path(prefix, key);
            let sub_rows = self.flatten_value(value, &path, depth + 1)?;
            rows = if rows.is_empty() {
                sub_rows
            } else {
                cartesian(&rows, &sub_rows)
            };
        }

        Ok(rows)
    }

    fn flatten_list(&self, items: &[Value], prefix: &str) -> Vec<Record> {
        let items: Cow<'_, [Value]> =
            if self.options.flatten_nested_arrays && items.iter().any(Value::is_array) {
                Cow::Owned(splice_sublists(items))
            } else {
                Cow::Borrowed(items)
            };

        if items.is_empty() {
            return Vec::new();
        }

        if self.options.explode_arrays && items.iter().all(is_scalar) {
            items
                .iter()
                .map(|item| single(prefix, item.clone()))
                .collect()
        } else {
            vec![single(prefix, Value::Array(items.into_owned()))]
        }
    }

    fn key_path(&self, prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}{}", prefix, self.options.separator, key)
        }
    }
}

/// Flatten one level of sub-lists: `[[1, 2], 3]` -> `[1, 2, 3]`
fn splice_sublists(items: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    out
}

fn single(key: &str, value: Value) -> Record {
    let mut row = Record::new();
    row.insert(key.to_string(), value);
    row
}

/// Every row of `left` combined with every row of `right`; keys already set
/// by `left` are overwritten only by keys `right` also produces.
fn cartesian(left: &[Record], right: &[Record]) -> Vec<Record> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for row in left {
        for sub in right {
            let mut combined = row.clone();
            combined.extend(sub.iter().map(|(k, v)| (k.clone(), v.clone())));
            out.push(combined);
        }
    }
    out
}
