use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One row: an ordered mapping from key path to value.
///
/// `serde_json` is built with `preserve_order`, so iteration follows
/// declaration order. The parent-identity rule and key alignment rely on it.
pub type Record = Map<String, Value>;

/// A derived table lifted out of the main records, e.g. `posts_table`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationTable {
    pub name: String,
    pub rows: Vec<Record>,
}

/// Ordered collection of relation tables.
///
/// Tables keep the order in which they were first registered, which is the
/// order the extractor met them (parents before their descendants).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relations {
    tables: Vec<RelationTable>,
}

impl Relations {
    pub fn new() -> Self {
        Relations { tables: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables (not rows)
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn get(&self, name: &str) -> Option<&[Record]> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.rows.as_slice())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.tables
            .iter()
            .map(|t| (t.name.as_str(), t.rows.as_slice()))
    }

    /// Rows of `name`, registering an empty table first if needed
    pub fn rows_mut(&mut self, name: &str) -> &mut Vec<Record> {
        let idx = match self.tables.iter().position(|t| t.name == name) {
            Some(idx) => idx,
            None => {
                self.tables.push(RelationTable {
                    name: name.to_string(),
                    rows: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        &mut self.tables[idx].rows
    }

    /// Append `rows` to `name`
    pub fn extend_table(&mut self, name: &str, rows: impl IntoIterator<Item = Record>) {
        self.rows_mut(name).extend(rows);
    }

    /// Concatenate every table of `other` onto this collection.
    ///
    /// Tables unknown to `self` are appended in `other`'s order.
    pub fn merge(&mut self, other: Relations) {
        for table in other.tables {
            self.extend_table(&table.name, table.rows);
        }
    }

    /// Rebuild every table's rows with `f`, keeping table order
    pub fn map_tables<F>(self, mut f: F) -> Relations
    where
        F: FnMut(&str, Vec<Record>) -> Vec<Record>,
    {
        let tables = self
            .tables
            .into_iter()
            .map(|t| {
                let rows = f(&t.name, t.rows);
                RelationTable { name: t.name, rows }
            })
            .collect();
        Relations { tables }
    }

    pub fn into_tables(self) -> Vec<RelationTable> {
        self.tables
    }
}

impl Serialize for Relations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for table in &self.tables {
            map.serialize_entry(&table.name, &table.rows)?;
        }
        map.end()
    }
}

/// Result of a normalization run: the main table plus its relation tables
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Normalized {
    pub main: Vec<Record>,
    pub relations: Relations,
}

impl Normalized {
    pub fn new(main: Vec<Record>, relations: Relations) -> Self {
        Normalized { main, relations }
    }

    /// The fail-empty result
    pub fn empty() -> Self {
        Normalized::default()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.relations.is_empty()
    }
}

/// A column-aligned table, the tabular output shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table whose columns are the union of the records' keys in
    /// first-appearance order. Missing cells are null.
    pub fn from_records(name: impl Into<String>, records: &[Record]) -> Self {
        let columns = key_union(records);
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Table {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// The assembled result in the requested output shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedOutput {
    Relational(Normalized),
    Tabular(Vec<Table>),
    Records(Vec<Record>),
}

/// A foreign key that was injected over an existing field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkCollision {
    pub table: String,
    pub field: String,
}

/// Non-fatal findings of an extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Array elements that did not fit the extraction (non-record elements
    /// of a relation array, container elements of a junction array)
    pub dropped_elements: usize,

    pub fk_collisions: Vec<FkCollision>,
}

impl Diagnostics {
    pub fn absorb(&mut self, other: Diagnostics) {
        self.dropped_elements += other.dropped_elements;
        self.fk_collisions.extend(other.fk_collisions);
    }

    pub fn is_clean(&self) -> bool {
        self.dropped_elements == 0 && self.fk_collisions.is_empty()
    }
}

/// True for anything that is neither a record nor a list
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// The value identifying a parent row: its `id` field, else its first field
pub fn parent_identity(record: &Record) -> Option<&Value> {
    record.get("id").or_else(|| record.values().next())
}

/// Render a key value for use inside a synthesized identifier.
/// Strings are used bare, everything else in its JSON form.
pub fn render_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A stable string form of `value` with object keys sorted at every level,
/// so records that differ only in key order render identically.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// `canonical_string` for a bare record
pub fn canonical_record(record: &Record) -> String {
    let mut out = String::new();
    write_canonical_record(record, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(record) => write_canonical_record(record, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_record(record: &Record, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = record.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

/// Union of the records' keys, in order of first appearance
pub fn key_union(records: &[Record]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parent_identity_prefers_id() {
        let r = record(json!({"name": "Alice", "id": 7}));
        assert_eq!(parent_identity(&r), Some(&json!(7)));

        let r = record(json!({"name": "Alice", "age": 30}));
        assert_eq!(parent_identity(&r), Some(&json!("Alice")));

        assert_eq!(parent_identity(&Record::new()), None);
    }

    #[test]
    fn test_canonical_string_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_ne!(canonical_string(&json!(1)), canonical_string(&json!("1")));
    }

    #[test]
    fn test_relations_keep_registration_order() {
        let mut relations = Relations::new();
        relations.rows_mut("b_table").push(record(json!({"x": 1})));
        relations.rows_mut("a_table");
        relations.rows_mut("b_table").push(record(json!({"x": 2})));

        let names: Vec<&str> = relations.table_names().collect();
        assert_eq!(names, vec!["b_table", "a_table"]);
        assert_eq!(relations.get("b_table").unwrap().len(), 2);
        assert!(relations.get("a_table").unwrap().is_empty());
    }

    #[test]
    fn test_table_from_heterogeneous_records() {
        let rows = vec![record(json!({"a": 1})), record(json!({"b": 2, "a": 3}))];
        let table = Table::from_records("main", &rows);

        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[0], vec![json!(1), Value::Null]);
        assert_eq!(table.rows[1], vec![json!(3), json!(2)]);
    }

    #[test]
    fn test_relations_serialize_as_map() {
        let mut relations = Relations::new();
        relations.rows_mut("tags_table").push(record(json!({"t": "x"})));
        let out = serde_json::to_value(&relations).unwrap();
        assert_eq!(out, json!({"tags_table": [{"t": "x"}]}));
    }
}
