//! Read-only status report for an index directory.

use crate::config::ArtifactPaths;
use crate::error::RetrieverError;
use crate::storage::{EmbeddingModelMetadata, IndexArtifact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Both files present and consistent
    Ready,
    /// No index has been built at this location
    Missing,
    /// Files exist but cannot be used
    Corrupted,
}

/// Everything known about an index without querying it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub state: IndexState,
    /// Explanation when the index is not ready
    pub error: Option<String>,
    pub index_dir: String,
    /// Size of the vector store file in bytes
    pub vector_file_size_bytes: Option<u64>,
    /// Size of the metadata file in bytes
    pub metadata_file_size_bytes: Option<u64>,
    pub embedding_model: Option<EmbeddingModelMetadata>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub total_chunks: usize,
    /// Distinct source records covered by the chunks
    pub total_records: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub vector_checksum: Option<String>,
    pub retriever_version: Option<String>,
}

impl IndexStatus {
    fn empty(state: IndexState, paths: &ArtifactPaths) -> Self {
        Self {
            state,
            error: None,
            index_dir: paths.dir.display().to_string(),
            vector_file_size_bytes: file_size(&paths.vector_path()),
            metadata_file_size_bytes: file_size(&paths.metadata_path()),
            embedding_model: None,
            chunk_size: None,
            chunk_overlap: None,
            total_chunks: 0,
            total_records: 0,
            created_at: None,
            vector_checksum: None,
            retriever_version: None,
        }
    }

    /// Describe a loaded artifact.
    pub fn from_artifact(artifact: &IndexArtifact, paths: &ArtifactPaths) -> Self {
        let header = artifact.header();
        let mut records: Vec<usize> = artifact.chunks().iter().map(|c| c.record_index).collect();
        records.dedup();

        Self {
            embedding_model: Some(header.embedding_model()),
            chunk_size: Some(header.chunk_size),
            chunk_overlap: Some(header.chunk_overlap),
            total_chunks: artifact.len(),
            total_records: records.len(),
            created_at: Some(header.created_at),
            vector_checksum: Some(header.vector_checksum.clone()),
            retriever_version: Some(header.retriever_version.clone()),
            ..Self::empty(IndexState::Ready, paths)
        }
    }

    /// Load the artifact at `paths` and report on it. Never fails; problems
    /// are reported through [`IndexStatus::state`] and [`IndexStatus::error`].
    pub async fn inspect(paths: &ArtifactPaths, limit: Duration) -> Self {
        match IndexArtifact::load_with_timeout(paths.clone(), limit).await {
            Ok(artifact) => Self::from_artifact(&artifact, paths),
            Err(e) => {
                let state = match e {
                    RetrieverError::ArtifactNotFound { .. } => IndexState::Missing,
                    _ => IndexState::Corrupted,
                };
                Self {
                    error: Some(e.to_string()),
                    ..Self::empty(state, paths)
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == IndexState::Ready
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
