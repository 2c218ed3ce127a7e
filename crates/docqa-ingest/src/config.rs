//! Configuration for the ingestion service
//!
//! Values come from `IngestConfig::default()`, optionally replaced by a TOML
//! file, then overridden by `DOCQA_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound for `cache.ttl_secs` (one year)
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Batch processing configuration
    pub processing: ProcessingConfig,
    /// Result cache configuration
    pub cache: CacheConfig,
    /// Index collaborator configuration
    pub index: IndexConfig,
    /// Session configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
    /// Directory where uploaded PDFs are saved before processing
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
            upload_dir: std::env::temp_dir().join("docqa-ingest").join("uploads"),
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Fixed size of the shared worker pool
    pub workers: usize,
    /// Maximum documents dispatched per sub-batch
    pub batch_size: usize,
    /// Pages per extraction unit
    pub chunk_size: u32,
    /// Timeout for a single extraction unit in seconds
    pub task_timeout_secs: u64,
    /// How long finished batches stay available for status polling
    pub batch_retention_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 100,
            chunk_size: 10,
            task_timeout_secs: 30,
            batch_retention_secs: 86_400,
        }
    }
}

impl ProcessingConfig {
    /// Per-unit timeout as a duration
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn batch_retention(&self) -> Duration {
        Duration::from_secs(self.batch_retention_secs)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for cached extraction results in seconds (default: 1 hour)
    pub ttl_secs: u64,
    /// Interval between sweeps of expired cache entries, sessions and
    /// finished batches
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            purge_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Index collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Feed successful extractions to the index builder
    pub enabled: bool,
    /// Directory where index snapshots are persisted
    pub storage_dir: PathBuf,
    /// Embedding model handed to the index builder
    pub embed_model: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let storage_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docqa-ingest")
            .join("index");

        Self {
            enabled: false,
            storage_dir,
            embed_model: "nomic-embed-text".to_string(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime in seconds (default: 8 hours)
    pub session_timeout_secs: u64,
    /// Username -> hex SHA-256 of the password
    pub users: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 28_800,
            users: HashMap::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing sections and keys keep their defaults
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Apply `DOCQA_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOCQA_HOST") {
            self.server.host = host;
        }
        override_parsed(&lookup, "DOCQA_PORT", &mut self.server.port)?;
        if let Some(dir) = lookup("DOCQA_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "DOCQA_WORKERS", &mut self.processing.workers)?;
        override_parsed(&lookup, "DOCQA_BATCH_SIZE", &mut self.processing.batch_size)?;
        override_parsed(&lookup, "DOCQA_CHUNK_SIZE", &mut self.processing.chunk_size)?;
        override_parsed(
            &lookup,
            "DOCQA_TASK_TIMEOUT_SECS",
            &mut self.processing.task_timeout_secs,
        )?;
        override_parsed(
            &lookup,
            "DOCQA_BATCH_RETENTION_SECS",
            &mut self.processing.batch_retention_secs,
        )?;
        override_parsed(&lookup, "DOCQA_CACHE_TTL_SECS", &mut self.cache.ttl_secs)?;
        override_parsed(&lookup, "DOCQA_INDEX_ENABLED", &mut self.index.enabled)?;
        if let Some(dir) = lookup("DOCQA_INDEX_DIR") {
            self.index.storage_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("DOCQA_EMBED_MODEL") {
            self.index.embed_model = model;
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.workers == 0 {
            return Err(Error::Config("processing.workers must be at least 1".into()));
        }
        if self.processing.batch_size == 0 {
            return Err(Error::Config("processing.batch_size must be at least 1".into()));
        }
        if self.processing.task_timeout_secs == 0 {
            return Err(Error::Config(
                "processing.task_timeout_secs must be at least 1".into(),
            ));
        }
        if self.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(Error::Config(format!(
                "cache.ttl_secs must be at most {}",
                MAX_CACHE_TTL_SECS
            )));
        }
        if self.cache.purge_interval_secs == 0 {
            return Err(Error::Config("cache.purge_interval_secs must be at least 1".into()));
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = IngestConfig::default();
        assert_eq!(config.processing.workers, 4);
        assert_eq!(config.processing.batch_size, 100);
        assert_eq!(config.processing.chunk_size, 10);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml(
            r#"
            [processing]
            workers = 2

            [cache]
            ttl_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.processing.workers, 2);
        assert_eq!(config.processing.batch_size, 100);
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = IngestConfig::default();
        config
            .apply_overrides(|key| match key {
                "DOCQA_WORKERS" => Some("8".to_string()),
                "DOCQA_PORT" => Some("9000".to_string()),
                "DOCQA_INDEX_ENABLED" => Some("true".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.processing.workers, 8);
        assert_eq!(config.server.port, 9000);
        assert!(config.index.enabled);
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_overrides(|key| (key == "DOCQA_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = IngestConfig::default();
        config.processing.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let mut config = IngestConfig::default();
        config
            .apply_overrides(|key| {
                (key == "DOCQA_CACHE_TTL_SECS").then(|| u64::MAX.to_string())
            })
            .unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.cache.ttl_secs = MAX_CACHE_TTL_SECS;
        assert!(config.validate().is_ok());
    }
}
