//! Process-wide configuration, loaded once at startup.
//!
//! Every component receives the section it needs through its constructor.
//! Nothing here is global: the CLI reads a TOML file (or uses the defaults),
//! resolves the dataset location and the generator API key exactly once, and
//! passes the results down.
//!
//! ```toml
//! [index]
//! dir = "vector_db"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "fastembed"
//! model = "sentence-transformers/all-MiniLM-L6-v2"
//!
//! [retrieval]
//! top_k = 5
//! max_context_chars = 4000
//!
//! [dataset]
//! candidates = ["data/medical_dataset/train.json"]
//! ```

use crate::error::{Result, RetrieverError};
use crate::retrieval::policy::ProviderPolicy;
use medrag_context::ChunkConfig;
use medrag_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider, HashingEmbedder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default configuration file looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "medrag.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub index: IndexSection,
    pub chunking: ChunkingSection,
    pub embedding: EmbeddingSection,
    pub retrieval: RetrievalSection,
    pub dataset: DatasetSection,
    pub generator: GeneratorSection,
}

impl RetrieverConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        tracing::info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.chunk_config()?;
        self.embedding.validate()?;
        self.retrieval.validate()?;
        self.generator.validate()?;
        if self.index.io_timeout_secs == 0 {
            return Err(RetrieverError::configuration(
                "index.io_timeout_secs must be greater than zero",
            ));
        }
        if self.index.vector_file == self.index.metadata_file {
            return Err(RetrieverError::configuration(
                "index.vector_file and index.metadata_file must differ",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    /// Directory holding the paired index artifact
    pub dir: PathBuf,
    pub vector_file: String,
    pub metadata_file: String,
    /// Upper bound for saving or loading the artifact
    pub io_timeout_secs: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("vector_db"),
            vector_file: "vector_index.bin".to_string(),
            metadata_file: "metadata.json".to_string(),
            io_timeout_secs: 60,
        }
    }
}

impl IndexSection {
    pub fn paths(&self) -> ArtifactPaths {
        ArtifactPaths::new(&self.dir, &self.vector_file, &self.metadata_file)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Locations of the two files that make up a persisted index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub vector_file: String,
    pub metadata_file: String,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>, vector_file: &str, metadata_file: &str) -> Self {
        Self {
            dir: dir.into(),
            vector_file: vector_file.to_string(),
            metadata_file: metadata_file.to_string(),
        }
    }

    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let defaults = IndexSection::default();
        Self::new(dir, &defaults.vector_file, &defaults.metadata_file)
    }

    pub fn vector_path(&self) -> PathBuf {
        self.dir.join(&self.vector_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(&self.metadata_file)
    }

    /// True when both files are present.
    pub fn exists(&self) -> bool {
        self.vector_path().is_file() && self.metadata_path().is_file()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Dataset name stored on every chunk
    pub source: String,
    /// Log build progress every this many records
    pub progress_every: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            chunk_size: medrag_context::text::DEFAULT_CHUNK_SIZE,
            chunk_overlap: medrag_context::text::DEFAULT_CHUNK_OVERLAP,
            source: "medical_dataset".to_string(),
            progress_every: 1000,
        }
    }
}

impl ChunkingSection {
    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        Ok(ChunkConfig::new(self.chunk_size, self.chunk_overlap)?)
    }
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX model through FastEmbed
    #[default]
    FastEmbed,
    /// Deterministic feature hashing, no model download
    Hashing,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::FastEmbed => write!(f, "fastembed"),
            ProviderKind::Hashing => write!(f, "hashing"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fastembed" => Ok(ProviderKind::FastEmbed),
            "hashing" => Ok(ProviderKind::Hashing),
            _ => Err(format!("Invalid embedding provider: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: ProviderKind,
    /// FastEmbed model name
    pub model: String,
    pub cache_dir: Option<PathBuf>,
    /// Texts per provider call during index build
    pub batch_size: usize,
    /// Provider calls in flight during index build
    pub concurrency: usize,
    /// Output dimension of the hashing provider
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model: medrag_embed::DEFAULT_MODEL_NAME.to_string(),
            cache_dir: None,
            batch_size: medrag_embed::DEFAULT_BATCH_SIZE,
            concurrency: 1,
            dimension: 384,
            timeout_secs: 60,
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl EmbeddingSection {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RetrieverError::configuration(
                "embedding.batch_size must be greater than zero",
            ));
        }
        if self.concurrency == 0 {
            return Err(RetrieverError::configuration(
                "embedding.concurrency must be greater than zero",
            ));
        }
        if self.provider == ProviderKind::Hashing && self.dimension == 0 {
            return Err(RetrieverError::configuration(
                "embedding.dimension must be greater than zero",
            ));
        }
        self.policy().validate()
    }

    pub fn policy(&self) -> ProviderPolicy {
        ProviderPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }

    pub fn embed_config(&self) -> EmbedConfig {
        let config = EmbedConfig::new(self.model.clone()).with_batch_size(self.batch_size);
        match &self.cache_dir {
            Some(dir) => config.with_cache_dir(dir),
            None => config,
        }
    }

    /// Name recorded in the index header for the configured model.
    pub fn model_name(&self) -> &str {
        match self.provider {
            ProviderKind::FastEmbed => &self.model,
            ProviderKind::Hashing => medrag_embed::HASHING_MODEL_NAME,
        }
    }

    /// Construct the configured provider.
    pub async fn create_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider: Arc<dyn EmbeddingProvider> = match self.provider {
            ProviderKind::FastEmbed => {
                Arc::new(FastEmbedProvider::create(self.embed_config()).await?)
            }
            ProviderKind::Hashing => Arc::new(HashingEmbedder::new(self.dimension)?),
        };
        tracing::info!(
            "Embedding provider ready: {} ({}, dimension {})",
            provider.provider_name(),
            provider.model_name(),
            provider.embedding_dimension()
        );
        Ok(provider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub max_context_chars: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_chars: 4000,
        }
    }
}

impl RetrievalSection {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RetrieverError::configuration(
                "retrieval.top_k must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSection {
    /// Locations tried in order; the first existing file wins
    pub candidates: Vec<PathBuf>,
    /// Only load the first `limit` records
    pub limit: Option<usize>,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            candidates: vec![
                PathBuf::from("data/medical_dataset/train.json"),
                PathBuf::from("../data/medical_dataset/train.json"),
                PathBuf::from("../../data/medical_dataset/train.json"),
            ],
            limit: None,
        }
    }
}

impl DatasetSection {
    /// Resolve the dataset location once.
    ///
    /// An explicit path (from the command line) replaces the candidate list.
    pub fn resolve(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => self.candidates.clone(),
        };
        match candidates.iter().find(|candidate| candidate.is_file()) {
            Some(found) => {
                tracing::info!("Using dataset {}", found.display());
                Ok(found.clone())
            }
            None => Err(RetrieverError::DatasetNotFound { candidates }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// OpenAI-compatible API root, without the `/chat/completions` suffix
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "qwen-max".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            temperature: 0.3,
            timeout_secs: 60,
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl GeneratorSection {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(RetrieverError::configuration(
                "generator.base_url must not be empty",
            ));
        }
        self.policy().validate()
    }

    pub fn policy(&self) -> ProviderPolicy {
        ProviderPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key_from_env(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(RetrieverError::configuration(format!(
                "set {} to use the answer generator",
                self.api_key_env
            ))),
        }
    }
}
