//! JSON snapshot of extracted nodes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{EmbeddingModel, IndexBuilder, IndexHandle};
use crate::error::{Error, Result};
use crate::types::TextNode;

/// File name written by [`NodeSnapshot::persist`]
pub const SNAPSHOT_FILE: &str = "index.json";

/// Persisted form of a built index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub model: EmbeddingModel,
    pub built_at: DateTime<Utc>,
    pub nodes: Vec<TextNode>,
}

#[async_trait]
impl IndexHandle for NodeSnapshot {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Replaces any previous snapshot atomically
    async fn persist(&self, dir: &Path) -> Result<PathBuf> {
        let data = serde_json::to_vec_pretty(self)?;
        let dir = dir.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let target = dir.join(SNAPSHOT_FILE);
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target)
                .map_err(|e| Error::index(format!("failed to persist {}: {}", target.display(), e)))?;
            Ok(target)
        })
        .await
        .map_err(|e| Error::internal(format!("index writer task failed: {}", e)))?
    }
}

/// Index builder that keeps nodes as-is
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeSnapshotIndex;

impl NodeSnapshotIndex {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IndexBuilder for NodeSnapshotIndex {
    async fn build(&self, nodes: &[TextNode], model: &EmbeddingModel) -> Result<Box<dyn IndexHandle>> {
        Ok(Box::new(NodeSnapshot {
            model: model.clone(),
            built_at: Utc::now(),
            nodes: nodes.to_vec(),
        }))
    }

    async fn load(&self, dir: &Path) -> Result<Box<dyn IndexHandle>> {
        let path = dir.join(SNAPSHOT_FILE);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("no index at {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        let snapshot: NodeSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| Error::index(format!("corrupt index {}: {}", path.display(), e)))?;
        Ok(Box::new(snapshot))
    }

    fn name(&self) -> &str {
        "node-snapshot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<TextNode> {
        (0..3)
            .map(|page| TextNode {
                page,
                filename: "manual.pdf".to_string(),
                text: format!("Page {}", page + 1),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_build_persist_load() {
        let dir = tempfile::tempdir().unwrap();
        let builder = NodeSnapshotIndex::new();
        let model = EmbeddingModel::new("nomic-embed-text");

        let handle = builder.build(&nodes(), &model).await.unwrap();
        assert_eq!(handle.node_count(), 3);

        let written = handle.persist(dir.path()).await.unwrap();
        assert_eq!(written, dir.path().join(SNAPSHOT_FILE));

        let loaded = builder.load(dir.path()).await.unwrap();
        assert_eq!(loaded.node_count(), 3);
    }

    #[tokio::test]
    async fn test_persist_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("indexes").join("latest");
        let handle = NodeSnapshotIndex
            .build(&nodes(), &EmbeddingModel::new("m"))
            .await
            .unwrap();
        handle.persist(&nested).await.unwrap();
        assert!(nested.join(SNAPSHOT_FILE).exists());
    }

    #[tokio::test]
    async fn test_load_missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeSnapshotIndex.load(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_corrupt_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"[1, 2").unwrap();
        let err = NodeSnapshotIndex.load(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::Index(_)));
    }
}
