//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default sentence embedding model, 384 dimensions.
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default number of texts sent to the model in one call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Configuration for the FastEmbed provider
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Name of the embedding model to use, see [`EmbedConfig::fastembed_model`]
    #[builder(default = "DEFAULT_MODEL_NAME.to_string()")]
    pub model_name: String,
    /// Directory where downloaded model files are cached
    #[builder(default)]
    pub cache_dir: Option<PathBuf>,
    /// Maximum batch size for embedding generation
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    /// Whether to show a progress bar while the model downloads
    #[builder(default = "true")]
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            cache_dir: None,
            batch_size: DEFAULT_BATCH_SIZE,
            show_download_progress: true,
        }
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Create a configuration for the named model with default settings
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Set the model cache directory (builder style)
    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.as_ref().to_path_buf()),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to show download progress (builder style)
    pub fn with_download_progress(self, show_download_progress: bool) -> Self {
        Self {
            show_download_progress,
            ..self
        }
    }

    /// Resolve the configured name to a built-in FastEmbed model.
    ///
    /// Both the full Hugging Face repository name and the short model name are
    /// accepted, e.g. `sentence-transformers/all-MiniLM-L6-v2` and
    /// `all-MiniLM-L6-v2`.
    pub fn fastembed_model(&self) -> Result<EmbeddingModel> {
        let short_name = self
            .model_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.model_name);

        match short_name.to_ascii_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
            "paraphrase-multilingual-minilm-l12-v2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
            _ => Err(EmbedError::invalid_config(format!(
                "unsupported embedding model: {}",
                self.model_name
            ))),
        }
    }

    /// Validate the configuration without loading anything
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch size must be greater than zero",
            ));
        }
        self.fastembed_model()?;
        if let Some(dir) = &self.cache_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(EmbedError::CacheDirUnavailable { path: dir.clone() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EmbedConfig::default();
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(config.batch_size, 32);
        assert!(config.cache_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_matches_default() {
        let built = EmbedConfig::builder().build().unwrap();
        assert_eq!(built, EmbedConfig::default());

        let custom = EmbedConfig::builder()
            .model_name("BAAI/bge-small-en-v1.5")
            .batch_size(8usize)
            .build()
            .unwrap();
        assert_eq!(custom.batch_size, 8);
        assert!(custom.validate().is_ok());
    }

    #[test]
    fn test_model_name_resolution() {
        let short = EmbedConfig::new("all-MiniLM-L6-v2");
        assert!(matches!(
            short.fastembed_model(),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));

        let multilingual = EmbedConfig::new("intfloat/multilingual-e5-small");
        assert!(matches!(
            multilingual.fastembed_model(),
            Ok(EmbeddingModel::MultilingualE5Small)
        ));

        let unknown = EmbedConfig::new("acme/medical-bert");
        assert!(matches!(
            unknown.fastembed_model(),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let config = EmbedConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());

        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let config = EmbedConfig::default().with_cache_dir(&file);
        assert!(matches!(
            config.validate(),
            Err(EmbedError::CacheDirUnavailable { .. })
        ));

        let config = EmbedConfig::default().with_cache_dir(dir.path());
        assert!(config.validate().is_ok());
    }
}
