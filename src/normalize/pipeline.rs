//! The normalization pipeline.
//!
//! ```text
//! document(s) -> flatten -> extract relations -> align -> rename
//!             -> cast -> validate -> dedup -> null sentinel -> assemble
//! ```
//!
//! A top-level array made only of records is a batch: every element runs
//! flatten and extract on its own (on the rayon pool when `parallel` is set)
//! and the results are merged in input order before the table-wide steps.

use crate::config::{ErrorStrategy, KeyConvention, NormalizeConfig, OutputFormat};
use crate::error::{ErrorHandler, NormalizeError, Result};
use crate::naming::normalize_keys;
use crate::normalize::dedup::{deduplicate, deduplicate_relations};
use crate::normalize::flatten::Flattener;
use crate::normalize::nulls::{align_records, replace_nulls_in_record};
use crate::normalize::relation::RelationExtractor;
use crate::schema::{cast_record, validate_record};
use crate::types::{Diagnostics, Normalized, NormalizedOutput, Record, Relations, Table};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Output of flatten + extract for one document
#[derive(Debug, Default)]
struct Unnested {
    main: Vec<Record>,
    relations: Relations,
    diagnostics: Diagnostics,
}

/// Runs documents through the full pipeline with one configuration
pub struct Normalizer {
    config: NormalizeConfig,
    flattener: Flattener,
    extractor: RelationExtractor,
    handler: ErrorHandler,
}

impl Normalizer {
    /// Fails with `Configuration` when `config` does not validate
    pub fn new(config: NormalizeConfig) -> Result<Self> {
        config.validate()?;

        let options = config.flatten_options();
        let flattener = Flattener::new(options.clone());
        let extractor = RelationExtractor::new(config.foreign_key_name.clone(), false, &options);
        let handler = ErrorHandler::new(config.error_strategy);

        Ok(Normalizer {
            config,
            flattener,
            extractor,
            handler,
        })
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    /// Normalize `document` into a main table and its relation tables.
    ///
    /// Under `warn` and `skip` a failing run yields an empty result instead
    /// of an error. Nesting-depth failures always propagate.
    pub fn normalize(&self, document: &Value) -> Result<Normalized> {
        match self.run(document) {
            Ok(normalized) => Ok(normalized),
            Err(err) => {
                self.handler.handle(err, "normalization")?;
                Ok(Normalized::empty())
            }
        }
    }

    /// [`normalize`](Self::normalize), then assemble the configured output
    /// shape
    pub fn normalize_output(&self, document: &Value) -> Result<NormalizedOutput> {
        let normalized = self.normalize(document)?;
        Ok(assemble(normalized, self.config.output_format))
    }

    fn run(&self, document: &Value) -> Result<Normalized> {
        let documents = batch(document)?;
        debug!(documents = documents.len(), "starting normalization");

        let unnested: Vec<Unnested> = if self.config.parallel && documents.len() > 1 {
            documents
                .par_iter()
                .map(|doc| self.unnest(doc))
                .collect::<Result<Vec<_>>>()?
        } else {
            documents
                .iter()
                .map(|doc| self.unnest(doc))
                .collect::<Result<Vec<_>>>()?
        };

        let mut merged = Unnested::default();
        for part in unnested {
            merged.main.extend(part.main);
            merged.relations.merge(part.relations);
            merged.diagnostics.absorb(part.diagnostics);
        }
        self.report(&merged.diagnostics)?;

        let Unnested { main, relations, .. } = merged;

        let main = align_records(&main);
        let relations = relations.map_tables(|_, rows| align_records(&rows));
        debug!(rows = main.len(), tables = relations.len(), "aligned keys");

        let (main, relations) = self.rename(main, relations);
        let main = self.cast(main);
        let main = self.validate(main)?;
        let (main, relations) = self.dedupe(main, relations);
        let (main, relations) = self.apply_null_value(main, relations);

        info!(rows = main.len(), tables = relations.len(), "normalization complete");
        Ok(Normalized::new(main, relations))
    }

    fn unnest(&self, document: &Value) -> Result<Unnested> {
        let rows = self.flattener.flatten(document)?;
        debug!(rows = rows.len(), "flattened document");

        if !self.config.extract_relations {
            return Ok(Unnested {
                main: rows,
                ..Default::default()
            });
        }

        let mut out = Unnested::default();
        for row in &rows {
            let nested = self.extractor.extract(row)?;
            out.main.push(nested.main);
            out.relations.merge(nested.relations);
            out.diagnostics.absorb(nested.diagnostics);
        }
        Ok(out)
    }

    /// Surface extraction findings. A foreign-key collision is an error unit
    /// of its own; dropped elements are only logged.
    fn report(&self, diagnostics: &Diagnostics) -> Result<()> {
        if diagnostics.is_clean() {
            return Ok(());
        }
        if diagnostics.dropped_elements > 0 {
            warn!(
                dropped = diagnostics.dropped_elements,
                "dropped array elements that are not records"
            );
        }
        for collision in &diagnostics.fk_collisions {
            self.recover(
                NormalizeError::ForeignKeyCollision {
                    table: collision.table.clone(),
                    field: collision.field.clone(),
                },
                "relation extraction",
            )?;
        }
        Ok(())
    }

    fn rename(&self, main: Vec<Record>, relations: Relations) -> (Vec<Record>, Relations) {
        let convention = self.config.key_convention;
        if convention == KeyConvention::Keep {
            return (main, relations);
        }

        let separator = self.config.separator.as_str();
        let main = normalize_keys(main, convention, separator);
        let relations = relations.map_tables(|_, rows| normalize_keys(rows, convention, separator));
        (main, relations)
    }

    fn cast(&self, main: Vec<Record>) -> Vec<Record> {
        let Some(schema) = &self.config.type_schema else {
            return main;
        };

        let mut failed = 0;
        let main: Vec<Record> = main
            .iter()
            .map(|record| {
                let report = cast_record(record, schema);
                if !report.is_clean() {
                    for (field, err) in &report.failures {
                        debug!(field = %field, error = %err, "kept original value");
                    }
                    failed += report.failures.len();
                }
                report.record
            })
            .collect();

        debug!(fields = schema.len(), failed, "applied type casting");
        main
    }

    /// Drop the rows that fail the validation schema, each failure going
    /// through the error strategy
    fn validate(&self, main: Vec<Record>) -> Result<Vec<Record>> {
        let Some(schema) = &self.config.validation_schema else {
            return Ok(main);
        };

        let mut valid = Vec::with_capacity(main.len());
        for (index, record) in main.into_iter().enumerate() {
            let report = validate_record(&record, schema);
            if report.valid {
                valid.push(record);
            } else {
                self.recover(
                    NormalizeError::SchemaValidation(format!(
                        "row {index}: {}",
                        report.errors.join("; ")
                    )),
                    "validation",
                )?;
            }
        }
        Ok(valid)
    }

    fn dedupe(&self, main: Vec<Record>, relations: Relations) -> (Vec<Record>, Relations) {
        if !self.config.remove_duplicates {
            return (main, relations);
        }

        let before = main.len();
        let main = deduplicate(
            main,
            self.config.dedup_key_fields.as_deref(),
            self.config.keep,
        );
        let relations = deduplicate_relations(relations, &self.config.dedup_rules);
        debug!(before, after = main.len(), "removed duplicates");
        (main, relations)
    }

    fn apply_null_value(&self, main: Vec<Record>, relations: Relations) -> (Vec<Record>, Relations) {
        let Some(sentinel) = &self.config.null_value else {
            return (main, relations);
        };

        let replace = |rows: Vec<Record>| -> Vec<Record> {
            rows.into_iter()
                .map(|row| replace_nulls_in_record(row, sentinel))
                .collect()
        };
        let main = replace(main);
        let relations = relations.map_tables(|_, rows| replace(rows));
        (main, relations)
    }

    /// Route a unit-level error through the strategy. Under `raise` the error
    /// propagates unlogged; [`normalize`](Self::normalize) reports it once.
    fn recover(&self, err: NormalizeError, context: &str) -> Result<()> {
        match self.handler.strategy() {
            ErrorStrategy::Raise => Err(err),
            _ => self.handler.handle(err, context),
        }
    }
}

/// Split a batch into its documents; any other record or list is one
/// document. A bare scalar has no table to land in.
fn batch(document: &Value) -> Result<Vec<&Value>> {
    match document {
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(items.iter().collect()),
        Value::Array(_) | Value::Object(_) => Ok(vec![document]),
        scalar => Err(NormalizeError::Transform(format!(
            "expected a record or an array of records, got {scalar}"
        ))),
    }
}

/// Shape a result for `format`. Tabular output always starts with `main`.
pub fn assemble(normalized: Normalized, format: OutputFormat) -> NormalizedOutput {
    match format {
        OutputFormat::Relational => NormalizedOutput::Relational(normalized),
        OutputFormat::Records => NormalizedOutput::Records(normalized.main),
        OutputFormat::Tabular => {
            let mut tables = vec![Table::from_records("main", &normalized.main)];
            tables.extend(
                normalized
                    .relations
                    .into_tables()
                    .into_iter()
                    .map(|table| Table::from_records(table.name, &table.rows)),
            );
            NormalizedOutput::Tabular(tables)
        }
    }
}
