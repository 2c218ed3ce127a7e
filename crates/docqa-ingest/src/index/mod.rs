//! Index collaborator interface
//!
//! The pipeline hands extracted nodes to an [`IndexBuilder`]; vector math
//! lives behind that trait. [`NodeSnapshotIndex`] is the bundled builder and
//! only stores the nodes.

mod snapshot;

pub use snapshot::{NodeSnapshot, NodeSnapshotIndex, SNAPSHOT_FILE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::TextNode;

/// Embedding model the index is built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub name: String,
}

impl EmbeddingModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A built index that can be written to disk
#[async_trait]
pub trait IndexHandle: Send + Sync {
    /// Number of nodes the index holds
    fn node_count(&self) -> usize;

    /// Write the index under `dir`; returns the written file
    async fn persist(&self, dir: &Path) -> Result<PathBuf>;
}

/// Builds indexes from extracted nodes
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    async fn build(&self, nodes: &[TextNode], model: &EmbeddingModel) -> Result<Box<dyn IndexHandle>>;

    /// Reload an index previously persisted under `dir`
    async fn load(&self, dir: &Path) -> Result<Box<dyn IndexHandle>>;

    /// Builder name for logging
    fn name(&self) -> &str;
}
