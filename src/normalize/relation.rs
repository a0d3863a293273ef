use crate::config::KeepPolicy;
use crate::error::{NormalizeError, Result};
use crate::normalize::dedup::deduplicate;
use crate::normalize::flatten::{FlattenOptions, Flattener};
use crate::types::{
    is_scalar, parent_identity, render_key, Diagnostics, FkCollision, Record, Relations,
};
use serde_json::Value;
use tracing::debug;

const ID_FIELD: &str = "id";

/// Result of [`extract_child_table`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChildTable {
    /// The parent without the extracted field
    pub main: Record,
    pub child: Vec<Record>,
    /// `<field>_table`
    pub table_name: String,
    pub diagnostics: Diagnostics,
}

/// Result of [`extract_junction_table`]
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionTable {
    pub main: Record,
    pub junction: Vec<Record>,
    /// `<field>_junction`
    pub table_name: String,
    pub diagnostics: Diagnostics,
}

/// Result of [`RelationExtractor::extract`]
#[derive(Debug, Clone, PartialEq)]
pub struct NestedRelations {
    pub main: Record,
    pub relations: Relations,
    pub diagnostics: Diagnostics,
}

/// How [`flatten_nested_array`] treats sub-lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedArrayMode {
    /// Splice sub-lists recursively until none remain
    Flat,
    /// Return the list untouched
    Keep,
}

/// Lift the array of records under `field` into a child table.
///
/// Every record element is copied and given `fk_name` = the parent's `id`,
/// or its first field's value when there is no `id`. Non-record elements are
/// dropped and counted. An absent or non-list field leaves the parent as-is.
pub fn extract_child_table(parent: &Record, field: &str, fk_name: &str, dedupe: bool) -> ChildTable {
    let table_name = format!("{}_table", field);
    let mut diagnostics = Diagnostics::default();

    let Some(Value::Array(items)) = parent.get(field) else {
        return ChildTable {
            main: parent.clone(),
            child: Vec::new(),
            table_name,
            diagnostics,
        };
    };

    let fk_value = parent_identity(parent).cloned().unwrap_or(Value::Null);
    let mut child = Vec::with_capacity(items.len());

    for item in items {
        let Value::Object(record) = item else {
            diagnostics.dropped_elements += 1;
            continue;
        };
        let mut row = record.clone();
        if row.contains_key(fk_name) {
            diagnostics.fk_collisions.push(FkCollision {
                table: table_name.clone(),
                field: fk_name.to_string(),
            });
        }
        row.insert(fk_name.to_string(), fk_value.clone());
        child.push(row);
    }

    if dedupe {
        child = deduplicate(child, None, KeepPolicy::First);
    }

    ChildTable {
        main: without_field(parent, field),
        child,
        table_name,
        diagnostics,
    }
}

/// Turn the scalar references under `field` into rows of an N-to-N junction
/// table: `{fk_name: parent id, ref_name: element}`.
///
/// Record and list elements are skipped and counted.
pub fn extract_junction_table(
    parent: &Record,
    field: &str,
    fk_name: &str,
    ref_name: &str,
    dedupe: bool,
) -> JunctionTable {
    let table_name = format!("{}_junction", field);
    let mut diagnostics = Diagnostics::default();

    let Some(Value::Array(items)) = parent.get(field) else {
        return JunctionTable {
            main: parent.clone(),
            junction: Vec::new(),
            table_name,
            diagnostics,
        };
    };

    let fk_value = parent_identity(parent).cloned().unwrap_or(Value::Null);
    let mut junction = Vec::with_capacity(items.len());

    for item in items {
        if !is_scalar(item) {
            diagnostics.dropped_elements += 1;
            continue;
        }
        let mut row = Record::new();
        row.insert(fk_name.to_string(), fk_value.clone());
        row.insert(ref_name.to_string(), item.clone());
        junction.push(row);
    }

    if dedupe {
        junction = deduplicate(junction, None, KeepPolicy::First);
    }

    JunctionTable {
        main: without_field(parent, field),
        junction,
        table_name,
        diagnostics,
    }
}

/// Flatten sub-lists of `items` according to `mode`
pub fn flatten_nested_array(items: &[Value], mode: NestedArrayMode) -> Vec<Value> {
    match mode {
        NestedArrayMode::Keep => items.to_vec(),
        NestedArrayMode::Flat => {
            let mut out = Vec::with_capacity(items.len());
            splice_all(items, &mut out);
            out
        }
    }
}

fn splice_all(items: &[Value], out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) => splice_all(inner, out),
            other => out.push(other.clone()),
        }
    }
}

/// Recursively lifts arrays of records out of a flat record into relation
/// tables named `<prefix><field>_table`.
///
/// Each lifted row carries `fk_name` pointing at its owner and is flattened
/// and stripped of its own arrays of records before it is stored, so relation
/// tables hold flat rows only.
pub struct RelationExtractor {
    fk_name: String,
    dedupe: bool,
    flattener: Flattener,
}

impl RelationExtractor {
    /// Lifted rows are flattened with `options`' separator and depth limit;
    /// array explosion never applies to them.
    pub fn new(fk_name: impl Into<String>, dedupe: bool, options: &FlattenOptions) -> Self {
        let flattener = Flattener::new(FlattenOptions {
            separator: options.separator.clone(),
            explode_arrays: false,
            flatten_nested_arrays: false,
            max_depth: options.max_depth,
        });

        RelationExtractor {
            fk_name: fk_name.into(),
            dedupe,
            flattener,
        }
    }

    pub fn fk_name(&self) -> &str {
        &self.fk_name
    }

    /// Extract every nested relation of `record`.
    ///
    /// The input is left untouched; `main` is a copy without the lifted
    /// fields.
    pub fn extract(&self, record: &Record) -> Result<NestedRelations> {
        let mut relations = Relations::new();
        let mut diagnostics = Diagnostics::default();

        let owner = usable_identity(record);
        let main = self.extract_into(
            record.clone(),
            "",
            owner.as_ref(),
            0,
            &mut relations,
            &mut diagnostics,
        )?;

        if self.dedupe {
            relations = relations.map_tables(|_, rows| deduplicate(rows, None, KeepPolicy::First));
        }

        debug!(
            tables = relations.len(),
            dropped = diagnostics.dropped_elements,
            "extracted nested relations"
        );

        Ok(NestedRelations {
            main,
            relations,
            diagnostics,
        })
    }

    /// Strip the arrays of records from `record`, storing their elements in
    /// `relations`. `owner` identifies `record` for its children's foreign
    /// keys.
    fn extract_into(
        &self,
        record: Record,
        prefix: &str,
        owner: Option<&Value>,
        depth: usize,
        relations: &mut Relations,
        diagnostics: &mut Diagnostics,
    ) -> Result<Record> {
        let max = self.flattener.options().max_depth;
        if depth > max {
            return Err(NormalizeError::NestingDepth { depth, max });
        }

        let mut kept = Record::new();
        let mut lifted: Vec<(String, Vec<Value>)> = Vec::new();

        for (key, value) in record {
            match value {
                Value::Array(items) if starts_with_record(&items) => lifted.push((key, items)),
                other => {
                    kept.insert(key, other);
                }
            }
        }

        for (field, items) in lifted {
            let table = format!("{}{}_table", prefix, field);
            let child_prefix = format!("{}{}_", prefix, field);
            relations.rows_mut(&table);

            for (index, item) in items.into_iter().enumerate() {
                let Value::Object(element) = item else {
                    diagnostics.dropped_elements += 1;
                    continue;
                };

                let synthesized = Value::String(match owner {
                    Some(id) => format!("{}_{}", render_key(id), index),
                    None => format!("{}_{}", field, index),
                });

                let mut row = self.flatten_element(element, depth + 1)?;
                let identity = match usable_identity(&row) {
                    Some(identity) => identity,
                    None => {
                        row = with_synthesized_id(row, &synthesized, &table, diagnostics);
                        synthesized.clone()
                    }
                };

                if row.contains_key(&self.fk_name) {
                    diagnostics.fk_collisions.push(FkCollision {
                        table: table.clone(),
                        field: self.fk_name.clone(),
                    });
                }
                row.insert(
                    self.fk_name.clone(),
                    owner.cloned().unwrap_or(synthesized),
                );

                let row = self.extract_into(
                    row,
                    &child_prefix,
                    Some(&identity),
                    depth + 1,
                    relations,
                    diagnostics,
                )?;
                relations.rows_mut(&table).push(row);
            }
        }

        Ok(kept)
    }

    /// Collapse nested records of an array element into key paths
    fn flatten_element(&self, element: Record, depth: usize) -> Result<Record> {
        let rows = self.flattener.flatten_from(&Value::Object(element), depth)?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }
}

/// Store `id` on a row that has no usable identity, so its children's foreign
/// keys resolve. The column goes first; an unusable existing `id` is replaced
/// and reported.
fn with_synthesized_id(
    row: Record,
    id: &Value,
    table: &str,
    diagnostics: &mut Diagnostics,
) -> Record {
    if row.contains_key(ID_FIELD) {
        diagnostics.fk_collisions.push(FkCollision {
            table: table.to_string(),
            field: ID_FIELD.to_string(),
        });
    }

    let mut out = Record::with_capacity(row.len() + 1);
    out.insert(ID_FIELD.to_string(), id.clone());
    out.extend(row.into_iter().filter(|(key, _)| key != ID_FIELD));
    out
}

/// Identity usable as a foreign key: a non-null scalar `id` or first field
fn usable_identity(record: &Record) -> Option<Value> {
    parent_identity(record)
        .filter(|v| is_scalar(v) && !v.is_null())
        .cloned()
}

fn starts_with_record(items: &[Value]) -> bool {
    matches!(items.first(), Some(Value::Object(_)))
}

fn without_field(record: &Record, field: &str) -> Record {
    record
        .iter()
        .filter(|(key, _)| key.as_str() != field)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn extractor(dedupe: bool) -> RelationExtractor {
        RelationExtractor::new("parent_id", dedupe, &FlattenOptions::default())
    }

    #[test]
    fn test_child_table_uses_parent_id() {
        let parent = record(json!({
            "name": "Alice",
            "id": 1,
            "items": [{"sku": "a"}, {"sku": "b"}]
        }));
        let out = extract_child_table(&parent, "items", "pid", false);

        assert_eq!(out.table_name, "items_table");
        assert!(!out.main.contains_key("items"));
        assert_eq!(out.main, record(json!({"name": "Alice", "id": 1})));
        assert_eq!(out.child.len(), 2);
        for child in &out.child {
            assert_eq!(child["pid"], json!(1));
        }
    }

    #[test]
    fn test_child_table_falls_back_to_first_field() {
        let parent = record(json!({"code": "X9", "items": [{"a": 1}, 5, "skip", {"a": 2}]}));
        let out = extract_child_table(&parent, "items", "pid", false);

        assert_eq!(out.child, vec![
            record(json!({"a": 1, "pid": "X9"})),
            record(json!({"a": 2, "pid": "X9"})),
        ]);
        assert_eq!(out.diagnostics.dropped_elements, 2);
    }

    #[test]
    fn test_child_table_absent_or_non_list_field() {
        let parent = record(json!({"id": 1, "items": "nope"}));
        let out = extract_child_table(&parent, "items", "pid", false);
        assert_eq!(out.main, parent);
        assert!(out.child.is_empty());

        let out = extract_child_table(&parent, "missing", "pid", false);
        assert_eq!(out.main, parent);
        assert_eq!(out.table_name, "missing_table");
    }

    #[test]
    fn test_child_table_dedupe_and_collision() {
        let parent = record(json!({"id": 1, "items": [{"a": 1}, {"a": 1}, {"a": 1, "pid": 9}]}));
        let out = extract_child_table(&parent, "items", "pid", true);

        assert_eq!(out.child, vec![record(json!({"a": 1, "pid": 1}))]);
        assert_eq!(out.diagnostics.fk_collisions.len(), 1);
    }

    #[test]
    fn test_junction_table_scalars_only() {
        let parent = record(json!({"student_id": 1, "courses": [101, 102]}));
        let out = extract_junction_table(&parent, "courses", "student_id", "course_id", false);

        assert_eq!(out.table_name, "courses_junction");
        assert_eq!(out.main, record(json!({"student_id": 1})));
        assert_eq!(out.junction, vec![
            record(json!({"student_id": 1, "course_id": 101})),
            record(json!({"student_id": 1, "course_id": 102})),
        ]);
    }

    #[test]
    fn test_junction_table_skips_containers_and_dedupes() {
        let parent = record(json!({"id": 3, "refs": [1, {"x": 1}, [2], 1, null]}));
        let out = extract_junction_table(&parent, "refs", "owner", "ref", true);

        assert_eq!(out.junction, vec![
            record(json!({"owner": 3, "ref": 1})),
            record(json!({"owner": 3, "ref": null})),
        ]);
        assert_eq!(out.diagnostics.dropped_elements, 2);
    }

    #[test]
    fn test_nested_relations_link_to_parent_id() {
        let input = record(json!({
            "id": 1,
            "production_companies": [
                {"id": 101, "name": "Company A"},
                {"id": 102, "name": "Company B"}
            ]
        }));
        let out = extractor(false).extract(&input).unwrap();

        assert_eq!(out.main, record(json!({"id": 1})));
        let rows = out.relations.get("production_companies_table").unwrap();
        assert_eq!(rows, &[
            record(json!({"id": 101, "name": "Company A", "parent_id": 1})),
            record(json!({"id": 102, "name": "Company B", "parent_id": 1})),
        ]);
    }

    #[test]
    fn test_nested_relations_synthesize_ids_without_owner() {
        let input = record(json!({"items": [{"a": 1}, {"a": 2}]}));
        let out = extractor(false).extract(&input).unwrap();

        assert!(out.main.is_empty());
        let rows = out.relations.get("items_table").unwrap();
        assert_eq!(rows[0]["parent_id"], json!("items_0"));
        assert_eq!(rows[1]["parent_id"], json!("items_1"));
    }

    #[test]
    fn test_grandchildren_get_prefixed_tables() {
        let input = record(json!({
            "id": 1,
            "posts": [
                {"title": "First", "comments": [{"text": "hi"}, {"text": "yo"}]},
                {"id": 20, "comments": [{"text": "hey"}]},
                {"comments": [{"text": "anon"}]}
            ]
        }));
        let out = extractor(false).extract(&input).unwrap();

        let names: Vec<&str> = out.relations.table_names().collect();
        assert_eq!(names, vec!["posts_table", "posts_comments_table"]);

        let posts = out.relations.get("posts_table").unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| !p.contains_key("comments")));
        assert!(posts.iter().all(|p| p["parent_id"] == json!(1)));

        let comments = out.relations.get("posts_comments_table").unwrap();
        let fks: Vec<Value> = comments.iter().map(|c| c["parent_id"].clone()).collect();
        assert_eq!(fks, vec![json!("First"), json!("First"), json!(20), json!("1_2")]);

        assert_eq!(posts[2], record(json!({"id": "1_2", "parent_id": 1})));
        for fk in &fks {
            assert!(
                posts.iter().any(|p| usable_identity(p).as_ref() == Some(fk)),
                "comment fk {fk} matches no post row"
            );
        }
    }

    #[test]
    fn test_synthesized_id_links_children() {
        let input = record(json!({"id": 1, "posts": [{"comments": [{"text": "anon"}]}]}));
        let out = extractor(false).extract(&input).unwrap();

        let posts = out.relations.get("posts_table").unwrap();
        assert_eq!(posts, &[record(json!({"id": "1_0", "parent_id": 1}))][..]);

        let comments = out.relations.get("posts_comments_table").unwrap();
        assert_eq!(comments[0]["parent_id"], posts[0]["id"]);
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn test_unusable_id_is_replaced_and_reported() {
        let input = record(json!({"items": [{"id": null, "tags": [{"t": 1}]}]}));
        let out = extractor(false).extract(&input).unwrap();

        let items = out.relations.get("items_table").unwrap();
        assert_eq!(items[0]["id"], json!("items_0"));
        assert_eq!(out.relations.get("items_tags_table").unwrap()[0]["parent_id"], json!("items_0"));
        assert_eq!(
            out.diagnostics.fk_collisions,
            vec![FkCollision {
                table: "items_table".into(),
                field: "id".into(),
            }]
        );
    }

    #[test]
    fn test_lifted_rows_are_flattened() {
        let input = record(json!({
            "id": 1,
            "videos": [{"key": "k1", "meta": {"site": "YouTube", "hd": true}}]
        }));
        let out = extractor(false).extract(&input).unwrap();

        let rows = out.relations.get("videos_table").unwrap();
        assert_eq!(rows[0], record(json!({"key": "k1", "meta.site": "YouTube", "meta.hd": true, "parent_id": 1})));
    }

    #[test]
    fn test_nested_dedupe_and_untouched_input() {
        let input = record(json!({"id": 1, "tags": [{"t": "a"}, {"t": "a"}, {"t": "b"}]}));
        let before = input.clone();
        let out = extractor(true).extract(&input).unwrap();

        assert_eq!(input, before);
        assert_eq!(out.relations.get("tags_table").unwrap().len(), 2);
    }

    #[test]
    fn test_mixed_relation_array_drops_non_records() {
        let input = record(json!({"id": 1, "items": [{"a": 1}, 2, "x"]}));
        let out = extractor(false).extract(&input).unwrap();

        assert_eq!(out.relations.get("items_table").unwrap().len(), 1);
        assert_eq!(out.diagnostics.dropped_elements, 2);
    }

    #[test]
    fn test_scalar_arrays_stay_in_main() {
        let input = record(json!({"id": 1, "tags": ["a", "b"], "empty": []}));
        let out = extractor(false).extract(&input).unwrap();
        assert_eq!(out.main, input);
        assert!(out.relations.is_empty());
    }

    #[test]
    fn test_deep_relation_chain_fails() {
        let mut value = json!({"leaf": 1});
        for _ in 0..12 {
            value = json!({"id": 1, "children": [value]});
        }
        let input: Record = serde_json::from_value(value).unwrap();

        let err = extractor(false).extract(&input).unwrap_err();
        assert!(matches!(err, NormalizeError::NestingDepth { .. }));
    }

    #[test]
    fn test_flatten_nested_array_modes() {
        let items = vec![json!([1, [2, [3]]]), json!(4)];
        assert_eq!(flatten_nested_array(&items, NestedArrayMode::Flat), vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(flatten_nested_array(&items, NestedArrayMode::Keep), items);
    }
}
