//! recordflow - Main Entry Point

use clap::{Parser, Subcommand};
use recordflow::config::PipelineConfig;
use recordflow::observability::{init_default_logging, metrics};
use recordflow::pipeline::{ingest_jsonl_into, spawn_periodic_flush, IngestReport, Pipeline};
use recordflow::storage::{wait_all, JsonLinesBackend, QueuedStorageWriter};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info, warn};

/// Monitoring record processing pipeline
#[derive(Parser)]
#[command(name = "recordflow")]
#[command(about = "Filter, aggregate and persist monitoring records")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RECORDFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed JSON-lines records through the configured pipeline
    Run {
        /// Input file; reads stdin when omitted
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting recordflow v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { input } => run_pipeline(config, input).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PipelineConfig::load_from_file(path)?);
    }

    for candidate in ["recordflow.toml", "config/recordflow.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PipelineConfig::load_from_file(path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create recordflow.toml".into())
}

fn handle_config_command(
    config: &PipelineConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        stages = config.processors.len(),
        output = %config.storage.output.display(),
        "Configuration is valid"
    );
    if show {
        println!("{}", config.to_toml_string()?);
    }
    Ok(())
}

async fn run_pipeline(
    config: PipelineConfig,
    input: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = JsonLinesBackend::open(&config.storage.output).await?;
    let (writer, writer_task) = QueuedStorageWriter::spawn(backend);

    let pipeline = Arc::new(Pipeline::from_config(&config, Arc::new(writer))?);
    let flusher = spawn_periodic_flush(Arc::clone(&pipeline), config.flush.interval());

    // Interrupting keeps whatever the report collected up to that point
    let mut report = IngestReport::default();
    tokio::select! {
        result = ingest_input(&pipeline, input.as_deref(), &mut report) => result?,
        _ = signal::ctrl_c() => {
            info!("Received interrupt, flushing buffered aggregates");
        }
    }

    flusher.abort();
    let _ = flusher.await;
    let mut pending = report.pending;
    pending.extend(pipeline.flush());
    let mut summary = report.completed;
    summary += wait_all(pending).await;

    // Every writer clone lives in the pipeline; dropping it closes the queue
    drop(pipeline);
    let persisted = writer_task.await??;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some records were not persisted");
    }
    info!(
        processed = report.processed,
        skipped = report.skipped,
        writes = summary.total(),
        persisted,
        metrics = %serde_json::to_string(&metrics().get_metrics())?,
        "Pipeline finished"
    );
    Ok(())
}

async fn ingest_input(
    pipeline: &Pipeline,
    input: Option<&Path>,
    report: &mut IngestReport,
) -> Result<(), Box<dyn std::error::Error>> {
    match input {
        Some(path) => {
            info!("Reading records from: {}", path.display());
            let file = tokio::fs::File::open(path).await?;
            ingest_jsonl_into(pipeline, BufReader::new(file), report).await?;
        }
        None => {
            info!("Reading records from stdin");
            ingest_jsonl_into(pipeline, BufReader::new(tokio::io::stdin()), report).await?;
        }
    }
    Ok(())
}
