//! Batch ingestion from the command line
//!
//! Run with: cargo run -p docqa-ingest --features cli --bin docqa-batch -- docs/

use anyhow::{bail, Context, Result};
use clap::Parser;
use docqa_ingest::{
    config::IngestConfig,
    ingestion::{count_pdf_pages, split_units},
    BatchCoordinator, BatchRegistry, MemoryBackend, PipelineMetrics,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docqa-batch",
    about = "Extract text from PDFs in parallel and print the batch result as JSON"
)]
struct Cli {
    /// PDF files or directories to scan for PDFs
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Worker pool size
    #[arg(long, conflicts_with = "all_cores")]
    workers: Option<usize>,
    /// One worker per CPU
    #[arg(long)]
    all_cores: bool,
    /// Pages per extraction unit
    #[arg(long)]
    chunk_size: Option<u32>,
    /// Documents per sub-batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Per-unit timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Persist a node snapshot index to this directory
    #[arg(long)]
    index_dir: Option<PathBuf>,
    /// Write the JSON result here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Only print how each document would be split
    #[arg(long)]
    dry_run: bool,
}

/// Expand directories into the PDFs below them, keeping argument order
fn collect_pdfs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            paths.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_pdf(e.path()))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        paths.extend(found);
    }
    paths
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn apply_flags(cli: &Cli, config: &mut IngestConfig) {
    if let Some(workers) = cli.workers {
        config.processing.workers = workers;
    }
    if cli.all_cores {
        config.processing.workers = num_cpus::get();
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.processing.chunk_size = chunk_size;
    }
    if let Some(batch_size) = cli.batch_size {
        config.processing.batch_size = batch_size;
    }
    if let Some(timeout) = cli.timeout {
        config.processing.task_timeout_secs = timeout;
    }
    if let Some(dir) = &cli.index_dir {
        config.index.enabled = true;
        config.index.storage_dir = dir.clone();
    }
}

fn dry_run(paths: &[PathBuf], chunk_size: u32) -> serde_json::Value {
    let documents: Vec<serde_json::Value> = paths
        .iter()
        .map(|path| match count_pdf_pages(path) {
            Ok(pages) => serde_json::json!({
                "path": path,
                "pages": pages,
                "units": split_units(pages, chunk_size)
                    .iter()
                    .map(|u| u.to_string())
                    .collect::<Vec<_>>(),
            }),
            Err(e) => serde_json::json!({ "path": path, "error": e.to_string() }),
        })
        .collect();
    serde_json::json!({ "chunk_size": chunk_size, "documents": documents })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docqa_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = IngestConfig::load(cli.config.as_deref())?;
    apply_flags(&cli, &mut config);
    config.validate()?;

    let paths = collect_pdfs(&cli.inputs);
    if paths.is_empty() {
        bail!("no PDF files found in {:?}", cli.inputs);
    }
    tracing::info!("Collected {} documents", paths.len());

    let output = if cli.dry_run {
        dry_run(&paths, config.processing.chunk_size)
    } else {
        let coordinator = BatchCoordinator::from_config(
            &config,
            Arc::new(MemoryBackend::new()),
            Arc::new(PipelineMetrics::new()),
            Arc::new(BatchRegistry::new()),
        );
        let batch = coordinator.process(paths).await?;
        tracing::info!(
            "{} processed, {} errors in {} documents",
            batch.processed,
            batch.errors,
            batch.total
        );
        serde_json::to_value(&batch)?
    };

    let rendered = serde_json::to_string_pretty(&output)?;
    match &cli.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", rendered),
    }

    Ok(())
}
