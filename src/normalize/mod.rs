//! Normalization of nested JSON into a main table plus relation tables
//!
//! The stages can be used on their own or through the [`Normalizer`]
//! pipeline, which chains them with one [`NormalizeConfig`](crate::NormalizeConfig).

pub mod dedup;
pub mod flatten;
pub mod nulls;
pub mod pipeline;
pub mod relation;
pub mod writer;

pub use dedup::{
    deduplicate, deduplicate_by_hash, deduplicate_relations, find_duplicates, merge_duplicates,
    take_first,
};
pub use flatten::{FlattenOptions, Flattener};
pub use nulls::{align_records, is_null_like, normalize_nulls, replace_nulls};
pub use pipeline::{assemble, Normalizer};
pub use relation::{
    extract_child_table, extract_junction_table, flatten_nested_array, ChildTable, JunctionTable,
    NestedArrayMode, NestedRelations, RelationExtractor,
};
pub use writer::{SingleWriter, TableFormat, TableWriter};
