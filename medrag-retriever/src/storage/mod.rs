//! Persistence of the paired index artifact.
//!
//! A built index is two files that only make sense together:
//!
//! - the vector store (`vector_index.bin`, see [`VectorIndex`] for the format)
//! - the metadata file (`metadata.json`): an [`IndexHeader`] plus the ordered
//!   chunk list, where chunk `i` belongs to vector `i`
//!
//! The header records the BLAKE3 checksum of the vector store, so a vector
//! file and a metadata file from two different builds are detected on load.
//!
//! Saving writes both files into a staging directory next to the target,
//! syncs them, and then swaps the staging directory into place with renames.
//! Readers therefore see either the previous pair, the new pair, or (after a
//! crash in the middle of the swap) no index at all; never one file without
//! the other. The index directory is owned by the artifact and replaced as a
//! whole.

use crate::config::ArtifactPaths;
use crate::error::{Result, RetrieverError};
use crate::retrieval::vector_index::VectorIndex;
use chrono::{DateTime, Utc};
use medrag_context::{ChunkConfig, RecordChunk};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A chunk as stored in the metadata file.
pub type Chunk = RecordChunk;

pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Metadata about the embedding model used for generating embeddings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelMetadata {
    /// Name of the embedding model (e.g., "sentence-transformers/all-MiniLM-L6-v2")
    pub model_name: String,
    /// Provider of the embedding model (e.g., "fastembed")
    pub provider: String,
    /// Dimension of the embedding vectors
    pub dimension: usize,
}

impl EmbeddingModelMetadata {
    pub fn new(model_name: impl Into<String>, provider: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            provider: provider.into(),
            dimension,
        }
    }

    /// Describe a live provider.
    pub fn of(provider: &dyn medrag_embed::EmbeddingProvider) -> Self {
        Self::new(
            provider.model_name(),
            provider.provider_name(),
            provider.embedding_dimension(),
        )
    }
}

/// Build-time header stored at the top of the metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format_version: u32,
    /// Version of medrag-retriever that created this index
    pub retriever_version: String,
    pub embedding_model_name: String,
    pub embedding_provider: String,
    pub embedding_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub created_at: DateTime<Utc>,
    pub total_chunks: usize,
    /// Hex BLAKE3 hash of the vector store file
    pub vector_checksum: String,
}

impl IndexHeader {
    pub fn embedding_model(&self) -> EmbeddingModelMetadata {
        EmbeddingModelMetadata::new(
            self.embedding_model_name.clone(),
            self.embedding_provider.clone(),
            self.embedding_dimension,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MetadataFile {
    header: IndexHeader,
    chunks: Vec<Chunk>,
}

/// An immutable, consistent pair of vector index and chunk metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexArtifact {
    header: IndexHeader,
    index: VectorIndex,
    chunks: Vec<Chunk>,
}

impl IndexArtifact {
    /// Assemble an artifact from freshly built parts.
    pub fn new(
        model: &EmbeddingModelMetadata,
        chunk_config: ChunkConfig,
        index: VectorIndex,
        chunks: Vec<Chunk>,
    ) -> Result<Self> {
        let header = IndexHeader {
            format_version: METADATA_FORMAT_VERSION,
            retriever_version: env!("CARGO_PKG_VERSION").to_string(),
            embedding_model_name: model.model_name.clone(),
            embedding_provider: model.provider.clone(),
            embedding_dimension: model.dimension,
            chunk_size: chunk_config.max_chars,
            chunk_overlap: chunk_config.overlap_chars,
            created_at: Utc::now(),
            total_chunks: chunks.len(),
            vector_checksum: checksum(&index.to_bytes()),
        };
        if model.dimension != index.dimension() {
            return Err(RetrieverError::DimensionMismatch {
                expected: index.dimension(),
                actual: model.dimension,
            });
        }
        Self::from_parts(header, index, chunks, Path::new("<memory>"))
    }

    // Checks the positional invariant between the two halves.
    fn from_parts(
        header: IndexHeader,
        index: VectorIndex,
        chunks: Vec<Chunk>,
        origin: &Path,
    ) -> Result<Self> {
        if header.format_version != METADATA_FORMAT_VERSION {
            return Err(RetrieverError::corruption(
                origin,
                format!("unsupported metadata format version {}", header.format_version),
            ));
        }
        if chunks.len() != index.len() || header.total_chunks != chunks.len() {
            return Err(RetrieverError::corruption(
                origin,
                format!(
                    "metadata lists {} chunks (header says {}) but the vector store holds {} vectors",
                    chunks.len(),
                    header.total_chunks,
                    index.len()
                ),
            ));
        }
        if header.embedding_dimension != index.dimension() {
            return Err(RetrieverError::corruption(
                origin,
                format!(
                    "header dimension {} does not match vector dimension {}",
                    header.embedding_dimension,
                    index.dimension()
                ),
            ));
        }
        if let Some(position) = chunks
            .iter()
            .zip(index.ids())
            .position(|(chunk, id)| &chunk.id != id)
        {
            return Err(RetrieverError::corruption(
                origin,
                format!(
                    "chunk at position {position} is {} but the vector store has {}",
                    chunks[position].id,
                    index.ids()[position]
                ),
            ));
        }
        Ok(Self {
            header,
            index,
            chunks,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The chunk stored at `position`, if any.
    pub fn chunk(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Write both files and swap them into place together.
    pub fn save(&self, paths: &ArtifactPaths) -> Result<()> {
        let vector_bytes = self.index.to_bytes();
        let metadata_bytes = serde_json::to_vec_pretty(&MetadataFile {
            header: self.header.clone(),
            chunks: self.chunks.clone(),
        })?;

        let parent = parent_dir(&paths.dir);
        fs::create_dir_all(&parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".medrag-staging-")
            .tempdir_in(&parent)?;
        write_synced(&staging.path().join(&paths.vector_file), &vector_bytes)?;
        write_synced(&staging.path().join(&paths.metadata_file), &metadata_bytes)?;

        let backup = backup_path(&paths.dir);
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }
        let had_previous = paths.dir.exists();
        if had_previous {
            fs::rename(&paths.dir, &backup)?;
        }

        if let Err(e) = fs::rename(staging.path(), &paths.dir) {
            if had_previous {
                fs::rename(&backup, &paths.dir)?;
            }
            return Err(e.into());
        }
        // The staging directory has been moved; dropping the handle is a no-op.
        drop(staging);

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                tracing::warn!("Could not remove previous index {}: {}", backup.display(), e);
            }
        }

        tracing::info!(
            "Saved index with {} chunks to {} ({} + {} bytes)",
            self.len(),
            paths.dir.display(),
            vector_bytes.len(),
            metadata_bytes.len()
        );
        Ok(())
    }

    /// Load and cross-check both files.
    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let vector_path = paths.vector_path();
        let metadata_path = paths.metadata_path();
        for path in [&vector_path, &metadata_path] {
            if !path.is_file() {
                return Err(RetrieverError::ArtifactNotFound { path: path.clone() });
            }
        }

        let vector_bytes = fs::read(&vector_path)?;
        let metadata: MetadataFile = serde_json::from_slice(&fs::read(&metadata_path)?)
            .map_err(|e| RetrieverError::corruption(&metadata_path, e.to_string()))?;
        let index = VectorIndex::from_bytes(&vector_bytes, &vector_path)?;

        let expected_checksum = metadata.header.vector_checksum.clone();
        let artifact = Self::from_parts(metadata.header, index, metadata.chunks, &metadata_path)?;

        if checksum(&vector_bytes) != expected_checksum {
            return Err(RetrieverError::corruption(
                &vector_path,
                "checksum mismatch: vector store and metadata come from different builds",
            ));
        }

        tracing::info!(
            "Loaded index with {} chunks from {} (model {}, dimension {})",
            artifact.len(),
            paths.dir.display(),
            artifact.header.embedding_model_name,
            artifact.header.embedding_dimension
        );
        Ok(artifact)
    }

    /// [`IndexArtifact::save`] on a blocking thread, bounded by `limit`.
    ///
    /// On timeout the write may still finish in the background; the directory
    /// swap keeps the on-disk pair consistent either way.
    pub async fn save_with_timeout(
        artifact: Arc<Self>,
        paths: ArtifactPaths,
        limit: Duration,
    ) -> Result<()> {
        let task = tokio::task::spawn_blocking(move || artifact.save(&paths));
        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(RetrieverError::timeout("index save", limit)),
        }
    }

    /// [`IndexArtifact::load`] on a blocking thread, bounded by `limit`.
    pub async fn load_with_timeout(paths: ArtifactPaths, limit: Duration) -> Result<Self> {
        let task = tokio::task::spawn_blocking(move || Self::load(&paths));
        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(RetrieverError::timeout("index load", limit)),
        }
    }
}

/// Hex-encoded BLAKE3 hash.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn parent_dir(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn backup_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    parent_dir(dir).join(format!(".{name}.previous"))
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
