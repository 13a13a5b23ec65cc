//! Error taxonomy for index building and retrieval.
//!
//! Variants fall into four groups:
//!
//! - **Fatal configuration errors**: [`RetrieverError::Configuration`],
//!   [`RetrieverError::DimensionMismatch`], [`RetrieverError::DatasetNotFound`]
//! - **Fatal artifact errors**: [`RetrieverError::ArtifactNotFound`],
//!   [`RetrieverError::ArtifactCorruption`]
//! - **Retryable provider errors**: [`RetrieverError::ProviderUnavailable`],
//!   [`RetrieverError::Timeout`], [`RetrieverError::Generation`]
//! - **Caller errors**: [`RetrieverError::InvalidInput`]
//!
//! An empty search result is not an error anywhere in this crate.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RetrieverError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// Missing or invalid configuration values
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The stored index and the embedding provider disagree on dimension
    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An index artifact file is missing
    #[error("Index artifact not found: {}", .path.display())]
    ArtifactNotFound { path: PathBuf },

    /// The vector store and metadata do not belong together or are unreadable
    #[error("Index artifact corrupted ({}): {message}", .path.display())]
    ArtifactCorruption { path: PathBuf, message: String },

    /// An external provider failed on every attempt
    #[error("Provider unavailable after {attempts} attempt(s): {message}")]
    ProviderUnavailable { attempts: u32, message: String },

    /// A bounded operation ran out of time
    #[error("Timed out after {seconds:.1}s during {operation}")]
    Timeout { operation: String, seconds: f64 },

    /// The answer generator rejected a request or returned nothing usable
    #[error("Answer generation failed: {message}")]
    Generation { message: String },

    /// Invalid arguments from the caller
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// None of the configured dataset locations exist
    #[error("Dataset not found; tried: {}", format_candidates(.candidates))]
    DatasetNotFound { candidates: Vec<PathBuf> },

    #[error("Chunking configuration error: {source}")]
    Chunking {
        #[from]
        source: medrag_context::ChunkConfigError,
    },

    #[error("Embedding error: {source}")]
    Embedding {
        #[from]
        source: medrag_embed::EmbedError,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Invalid config file: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RetrieverError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn corruption<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::ArtifactCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn generation<S: Into<String>>(message: S) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, limit: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: limit.as_secs_f64(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Generation { .. }
            | Self::AsyncTask { .. } => true,
            Self::Embedding { source } => !matches!(
                source,
                medrag_embed::EmbedError::InvalidConfig { .. }
                    | medrag_embed::EmbedError::CacheDirUnavailable { .. }
            ),
            _ => false,
        }
    }

    /// Whether the error should stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::DimensionMismatch { .. }
                | Self::ArtifactNotFound { .. }
                | Self::ArtifactCorruption { .. }
                | Self::DatasetNotFound { .. }
                | Self::Chunking { .. }
                | Self::Toml { .. }
        )
    }
}
