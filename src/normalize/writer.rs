use crate::types::{Normalized, Record, Table};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// On-disk format of a [`TableWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    /// Header row plus one line per record; null cells are empty
    Csv,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Jsonl => "jsonl",
            TableFormat::Csv => "csv",
        }
    }
}

impl FromStr for TableFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(TableFormat::Jsonl),
            "csv" => Ok(TableFormat::Csv),
            other => anyhow::bail!("unsupported table format '{}', expected jsonl or csv", other),
        }
    }
}

/// Writes every table of a result to its own file, `main` included
pub struct TableWriter {
    output_dir: PathBuf,
    format: TableFormat,
}

impl TableWriter {
    /// Create the output directory if needed
    pub fn new<P: AsRef<Path>>(output_dir: P, format: TableFormat) -> Result<Self> {
        std::fs::create_dir_all(&output_dir).context("Failed to create output directory")?;

        Ok(TableWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            format,
        })
    }

    /// Write `main` and each relation table; returns the paths written
    pub fn write(&self, normalized: &Normalized) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(normalized.relations.len() + 1);
        paths.push(self.write_table("main", &normalized.main)?);
        for (name, rows) in normalized.relations.iter() {
            paths.push(self.write_table(name, rows)?);
        }
        Ok(paths)
    }

    fn write_table(&self, name: &str, rows: &[Record]) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("{}.{}", name, self.format.extension()));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create file: {}", path.display()))?;

        match self.format {
            TableFormat::Jsonl => {
                let mut writer = BufWriter::new(file);
                for row in rows {
                    let json = serde_json::to_string(row).context("Failed to serialize row")?;
                    writeln!(writer, "{}", json).context("Failed to write row")?;
                }
                writer.flush().context("Failed to flush writer")?;
            }
            TableFormat::Csv => write_csv(file, &Table::from_records(name, rows))?,
        }

        Ok(path)
    }
}

fn write_csv<W: Write>(writer: W, table: &Table) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(&table.columns)
        .context("Failed to write CSV header")?;
    for row in &table.rows {
        csv_writer
            .write_record(row.iter().map(csv_cell))
            .context("Failed to write CSV row")?;
    }
    csv_writer.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Writes every row of every table to one stream, tagging each row with a
/// `_table` field
pub struct SingleWriter<W: Write> {
    writer: W,
}

impl<W: Write> SingleWriter<W> {
    pub fn new(writer: W) -> Self {
        SingleWriter { writer }
    }

    pub fn write_normalized(&mut self, normalized: &Normalized) -> Result<()> {
        self.write_rows("main", &normalized.main)?;
        for (name, rows) in normalized.relations.iter() {
            self.write_rows(name, rows)?;
        }
        Ok(())
    }

    fn write_rows(&mut self, table: &str, rows: &[Record]) -> Result<()> {
        for row in rows {
            let mut data = Record::with_capacity(row.len() + 1);
            data.insert("_table".to_string(), Value::String(table.to_string()));
            data.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));

            let json = serde_json::to_string(&data).context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json).context("Failed to write row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relations;
    use serde_json::json;

    fn sample() -> Normalized {
        let mut relations = Relations::new();
        relations.extend_table(
            "posts_table",
            vec![serde_json::from_value(json!({"title": "Hi, there", "parent_id": 1})).unwrap()],
        );
        Normalized::new(
            vec![serde_json::from_value(json!({"id": 1, "name": "Alice", "email": null})).unwrap()],
            relations,
        )
    }

    #[test]
    fn test_single_writer() {
        let mut buffer = Vec::new();
        let mut writer = SingleWriter::new(&mut buffer);
        writer.write_normalized(&sample()).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"_table":"main","id":1"#));
        assert!(lines[1].contains(r#""_table":"posts_table""#));
    }

    #[test]
    fn test_csv_cells() {
        let mut buffer = Vec::new();
        let table = Table::from_records("main", &sample().main);
        write_csv(&mut buffer, &table).unwrap();

        assert_eq!(String::from_utf8(buffer).unwrap(), "id,name,email\n1,Alice,\n");
    }

    #[test]
    fn test_table_format_parse() {
        assert_eq!("CSV".parse::<TableFormat>().unwrap(), TableFormat::Csv);
        assert_eq!("ndjson".parse::<TableFormat>().unwrap(), TableFormat::Jsonl);
        assert!("parquet".parse::<TableFormat>().is_err());
    }
}
