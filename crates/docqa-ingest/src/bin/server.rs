//! Ingestion server binary
//!
//! Run with: cargo run -p docqa-ingest --bin docqa-ingest-server
//! Set DOCQA_CONFIG to a TOML file to override defaults.

use docqa_ingest::{config::IngestConfig, server::IngestServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docqa_ingest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("DOCQA_CONFIG").ok().map(PathBuf::from);
    let config = IngestConfig::load(config_path.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Workers: {} ({} CPUs available)", config.processing.workers, num_cpus::get());
    tracing::info!("  - Pages per unit: {}", config.processing.chunk_size);
    tracing::info!("  - Sub-batch size: {}", config.processing.batch_size);
    tracing::info!("  - Unit timeout: {}s", config.processing.task_timeout_secs);
    tracing::info!("  - Cache TTL: {}s", config.cache.ttl_secs);
    if config.index.enabled {
        tracing::info!("  - Index: {} ({})", config.index.storage_dir.display(), config.index.embed_model);
    }

    let server = IngestServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /batch-process     - Process PDFs on disk");
    println!("  POST /upload            - Upload PDFs");
    println!("  GET  /status/:batch_id  - Batch progress");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
