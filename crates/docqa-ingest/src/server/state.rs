//! Application state for the ingestion server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::cache::{CacheBackend, MemoryBackend};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use crate::processing::{BatchCoordinator, BatchRegistry};
use crate::session::{InMemorySessions, SessionAuthority};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: IngestConfig,
    coordinator: Arc<BatchCoordinator>,
    sessions: Arc<dyn SessionAuthority>,
    ready: RwLock<bool>,
}

impl AppState {
    /// Create state with the in-process cache backend and session table
    pub async fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Initializing ingestion state ({} workers, batch size {}, cache TTL {}s)",
            config.processing.workers,
            config.processing.batch_size,
            config.cache.ttl_secs
        );

        tokio::fs::create_dir_all(&config.server.upload_dir).await?;
        tracing::info!("Upload directory: {}", config.server.upload_dir.display());

        let backend = Arc::new(MemoryBackend::new());
        Arc::clone(&backend).spawn_purge_task(config.cache.purge_interval());

        let sessions = Arc::new(InMemorySessions::from_config(&config.auth));
        if config.auth.users.is_empty() {
            tracing::warn!("No users configured; login is disabled");
        }

        Arc::clone(&sessions).spawn_purge_task(config.cache.purge_interval());

        let state = Self::from_parts(config, backend, sessions);
        Arc::clone(state.registry()).spawn_purge_task(
            state.config().cache.purge_interval(),
            state.config().processing.batch_retention(),
        );
        state.set_ready(true);
        Ok(state)
    }

    /// Assemble state from explicit collaborators
    pub fn from_parts(
        config: IngestConfig,
        backend: Arc<dyn CacheBackend>,
        sessions: Arc<dyn SessionAuthority>,
    ) -> Self {
        let coordinator = Arc::new(BatchCoordinator::from_config(
            &config,
            backend,
            Arc::new(PipelineMetrics::new()),
            Arc::new(BatchRegistry::new()),
        ));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
                sessions,
                ready: RwLock::new(false),
            }),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.inner.coordinator
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        self.inner.coordinator.registry()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        self.inner.coordinator.metrics()
    }

    pub fn sessions(&self) -> &Arc<dyn SessionAuthority> {
        &self.inner.sessions
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
