//! flatland: normalize nested JSON into relational tables
//!
//! Usage:
//!   # Read from file, output to stdout (one row per line, tagged with `_table`)
//!   flatland data.json
//!
//!   # Read from stdin, output to stdout
//!   echo '{"id": 1, "posts": [{"id": 10}]}' | flatland
//!
//!   # Process NDJSON, write one CSV file per table
//!   flatland --ndjson events.jsonl --output-dir ./tables --format csv

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use flatland::{
    normalize_ndjson, ErrorStrategy, KeyConvention, NormalizeConfig, Normalized, Normalizer,
    SingleWriter, TableFormat, TableWriter,
};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flatland")]
#[command(about = "Normalize nested JSON into flat relational tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Process newline-delimited JSON (one document per line, one batch)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for one file per table.
    /// If omitted, writes every row to stdout with a `_table` field
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// File format for --output-dir: jsonl or csv
    #[arg(long, default_value = "jsonl")]
    format: TableFormat,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Separator for flattened key paths (default: ".")
    #[arg(long)]
    separator: Option<String>,

    /// Emit one row per element of arrays of scalars
    #[arg(long)]
    explode_arrays: bool,

    /// Splice sub-lists into their parent list before handling arrays
    #[arg(long)]
    flatten_nested_arrays: bool,

    /// Keep arrays of records in the main table
    #[arg(long)]
    no_relations: bool,

    /// Foreign key name injected into relation rows (default: parent_id)
    #[arg(long)]
    fk_name: Option<String>,

    /// Maximum nesting depth (default: 10)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Key naming convention: snake, camel or keep
    #[arg(long)]
    key_convention: Option<KeyConvention>,

    /// Remove duplicate rows from every table
    #[arg(long)]
    dedupe: bool,

    /// Value written in place of null
    #[arg(long)]
    null_value: Option<String>,

    /// raise, warn or skip
    #[arg(long)]
    error_strategy: Option<ErrorStrategy>,

    /// Process batch documents in parallel
    #[arg(long)]
    parallel: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;
    debug!(?config, "resolved configuration");

    let content = read_input(args.input.as_ref())?;
    let normalized = if args.ndjson {
        normalize_ndjson(content.as_slice(), &config)?
    } else {
        normalize_content(content, &config)?
    };

    if let Some(output_dir) = &args.output_dir {
        let writer = TableWriter::new(output_dir, args.format)?;
        let paths = writer.write(&normalized)?;
        info!(files = paths.len(), dir = %output_dir.display(), "wrote tables");
    } else {
        let stdout = std::io::stdout();
        let mut writer = SingleWriter::new(stdout.lock());
        writer.write_normalized(&normalized)?;
        writer.flush()?;
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<NormalizeConfig> {
    let mut config = match &args.config {
        Some(path) => NormalizeConfig::from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => NormalizeConfig::default(),
    };

    if let Some(sep) = &args.separator {
        config.separator = sep.clone();
    }
    if args.explode_arrays {
        config.explode_arrays = true;
    }
    if args.flatten_nested_arrays {
        config.flatten_nested_arrays = true;
    }
    if args.no_relations {
        config.extract_relations = false;
    }
    if let Some(fk) = &args.fk_name {
        config.foreign_key_name = fk.clone();
    }
    if let Some(depth) = args.max_depth {
        config.max_nesting_depth = depth;
    }
    if let Some(convention) = args.key_convention {
        config.key_convention = convention;
    }
    if args.dedupe {
        config.remove_duplicates = true;
    }
    if let Some(null_value) = &args.null_value {
        config.null_value = Some(Value::String(null_value.clone()));
    }
    if let Some(strategy) = args.error_strategy {
        config.error_strategy = strategy;
    }
    if args.parallel {
        config.parallel = true;
    }

    config.validate()?;
    Ok(config)
}

fn read_input(input: Option<&PathBuf>) -> Result<Vec<u8>> {
    let reader = if let Some(path) = input {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Box::new(BufReader::new(file)) as Box<dyn Read>
    } else {
        Box::new(std::io::stdin()) as Box<dyn Read>
    };

    let mut content = Vec::new();
    BufReader::new(reader)
        .read_to_end(&mut content)
        .context("Failed to read input")?;
    Ok(content)
}

/// Parse one JSON document with simd-json. Input spanning several non-blank
/// lines that is not one document is read as NDJSON instead.
fn normalize_content(mut content: Vec<u8>, config: &NormalizeConfig) -> Result<Normalized> {
    let multi_line = looks_like_ndjson(&content);
    let original = if multi_line { content.clone() } else { Vec::new() };

    match simd_json::serde::from_slice::<Value>(&mut content) {
        Ok(document) => {
            let normalizer = Normalizer::new(config.clone())?;
            Ok(normalizer.normalize(&document)?)
        }
        Err(err) if multi_line => {
            debug!(error = %err, "input is not a single JSON document, reading as NDJSON");
            normalize_ndjson(original.as_slice(), config)
                .with_context(|| format!("Input is neither one JSON document ({err}) nor NDJSON"))
        }
        Err(err) => Err(err).context("Failed to parse JSON input"),
    }
}

/// More than one non-blank line
fn looks_like_ndjson(content: &[u8]) -> bool {
    content
        .split(|&b| b == b'\n')
        .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
        .nth(1)
        .is_some()
}
