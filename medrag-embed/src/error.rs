//! Error types for the embedding system

use std::path::PathBuf;

/// Result type for embedding operations.
///
/// Used throughout the crate for operations that can fail.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// # Error Categories
///
/// - **Configuration Errors**: unknown model names, zero batch size or dimension
/// - **Initialization Errors**: failures while loading the ONNX model
/// - **Runtime Errors**: problems during embedding generation
/// - **IO Errors**: cache directory access issues
/// - **External Errors**: failures from dependencies
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when the model cache directory cannot be used
    #[error("Model cache directory not usable: {path}")]
    CacheDirUnavailable { path: PathBuf },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The provider returned output that does not match the request
    #[error("Invalid embedding output: {message}")]
    InvalidOutput { message: String },

    /// A thread panicked while holding the model
    #[error("Embedding model lock poisoned")]
    LockPoisoned,

    /// IO errors when preparing the model cache
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap an error raised while loading a model.
    pub fn model_init<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    /// Wrap an error raised while generating embeddings.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid output error with a custom message.
    pub fn invalid_output<S: Into<String>>(message: S) -> Self {
        Self::InvalidOutput {
            message: message.into(),
        }
    }
}
