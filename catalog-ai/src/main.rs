//! catalog-ai - batch attribute enrichment
//!
//! **Usage:**
//! ```bash
//! catalog-ai predict products.json --out predicted.jsonl --errors-out errors.jsonl
//! catalog-ai enrich products.jsonl --config catalog.toml
//! ```
//!
//! Input is a JSON array, a single JSON object or JSONL. Each record may be
//! raw, ingested or already enriched. Successful records go to `--out`
//! (stdout when omitted), per-record errors to `--errors-out`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_ai::ingest::{load_records, write_jsonl};
use catalog_ai::providers::HttpVisionProducer;
use catalog_ai::types::RecordInput;
use catalog_ai::{Collaborators, Pipeline};
use catalog_common::AppConfig;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

/// Command-line arguments for catalog-ai
#[derive(Parser, Debug)]
#[command(name = "catalog-ai")]
#[command(about = "Enrich catalog product records with attribute predictions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML config file (environment variables still take precedence)
    #[arg(long, global = true, value_name = "FILE", env = "CIP_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of an HTTP vision service; the deterministic producer is used otherwise
    #[arg(long, global = true, value_name = "URL")]
    vision_endpoint: Option<String>,

    /// Timeout for vision service requests (seconds, > 0)
    #[arg(long, global = true, default_value = "5", value_parser = parse_timeout)]
    vision_timeout: Duration,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest and extract text attributes
    Enrich(IoArgs),
    /// Full pipeline: ingest, enrich, vision, fusion and side effects
    Predict(IoArgs),
}

#[derive(clap::Args, Debug)]
struct IoArgs {
    /// Input records (JSON array, object or JSONL)
    input: PathBuf,

    /// Output JSONL for successful records
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Output JSONL for per-record errors
    #[arg(long, value_name = "FILE")]
    errors_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    catalog_common::logging::init_tracing("catalog_ai=info,catalog_common=info");

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let mut collaborators = Collaborators::local(&config)?;
    if let Some(endpoint) = &args.vision_endpoint {
        let vision = HttpVisionProducer::new(endpoint.clone(), args.vision_timeout)?;
        info!("Vision endpoint: {}", endpoint);
        collaborators = collaborators.with_vision(Arc::new(vision));
    }
    let pipeline = Pipeline::new(config, collaborators);

    match args.command {
        Command::Enrich(io) => {
            let records = read_input(&pipeline, &io)?;
            let outcome = pipeline.enrich_batch(records).await;
            write_outputs(&io, &outcome.items, &outcome.errors)?;
        }
        Command::Predict(io) => {
            let records = read_input(&pipeline, &io)?;
            let outcome = pipeline.predict_batch(records).await;
            if let Some(error) = &outcome.outputs.error {
                warn!("Side effects incomplete: {}", error);
            }
            write_outputs(&io, &outcome.items, &outcome.errors)?;
        }
    }

    Ok(())
}

/// Positive, finite number of seconds
fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid number of seconds '{}': {}", value, e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("timeout must be a positive number of seconds, got {}", value));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn read_input(pipeline: &Pipeline, io: &IoArgs) -> Result<Vec<RecordInput>> {
    let records: Vec<RecordInput> = load_records(&io.input)
        .with_context(|| format!("Failed to read {}", io.input.display()))?;
    info!("Loaded {} records from {}", records.len(), io.input.display());
    pipeline.admit(&records)?;
    Ok(records)
}

fn write_outputs<T: Serialize, E: Serialize>(io: &IoArgs, items: &[T], errors: &[E]) -> Result<()> {
    match &io.out {
        Some(path) => {
            write_jsonl(path, items)?;
            info!("Wrote {} records to {}", items.len(), path.display());
        }
        None => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
    }

    match &io.errors_out {
        Some(path) => write_jsonl(path, errors)?,
        None if !errors.is_empty() => {
            for error in errors {
                eprintln!("{}", serde_json::to_string(error)?);
            }
        }
        None => {}
    }
    Ok(())
}
