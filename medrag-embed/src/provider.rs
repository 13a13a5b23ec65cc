//! Embedding provider trait and the FastEmbed implementation

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and is 0 when
    /// there are no embeddings.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations must be deterministic for identical input and must return
/// exactly one vector per input text, in input order. How texts are batched
/// internally is a performance detail and must not change the output.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_output("No embedding generated for text"))
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Get the name of the model behind this provider
    fn model_name(&self) -> &str;
}

/// Check that a provider response matches the request it answers.
pub fn validate_embeddings(
    result: &EmbeddingResult,
    expected_count: usize,
    expected_dimension: usize,
) -> Result<()> {
    if result.len() != expected_count {
        return Err(EmbedError::invalid_output(format!(
            "expected {expected_count} embeddings, got {}",
            result.len()
        )));
    }
    for (i, embedding) in result.embeddings.iter().enumerate() {
        if embedding.len() != expected_dimension {
            return Err(EmbedError::invalid_output(format!(
                "embedding {i} has dimension {}, expected {expected_dimension}",
                embedding.len()
            )));
        }
        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_output(format!(
                "embedding {i} contains non-finite values"
            )));
        }
    }
    Ok(())
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Download (if needed) and load the configured model.
    ///
    /// Loading happens on a blocking thread. The output dimension is probed
    /// with a test embedding and the model is validated before returning.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let model_kind = config.fastembed_model()?;

        if let Some(dir) = &config.cache_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        tracing::info!("Loading embedding model: {}", config.model_name);

        let load_config = config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let mut init_options = InitOptions::new(model_kind)
                    .with_show_download_progress(load_config.show_download_progress);
                if let Some(dir) = &load_config.cache_dir {
                    init_options = init_options.with_cache_dir(dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // Get dimension by generating a test embedding
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(EmbedError::invalid_output(
                        "model produced an empty probe embedding",
                    ));
                }

                Ok((model, dimension))
            })
            .await??;

        tracing::info!(
            "Model {} loaded successfully. Dimension: {}",
            config.model_name,
            dimension
        );

        let provider = Self {
            config,
            model: Arc::new(Mutex::new(model)),
            dimension,
        };
        provider.validate_model().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let texts = vec!["validation test".to_string()];
        let result = self.embed_texts(&texts).await?;
        validate_embeddings(&result, 1, self.dimension)?;
        tracing::debug!("Model validation passed for: {}", self.config.model_name);
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(&self.model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", batch.len());
                let mut model_guard = model.lock().map_err(|_| EmbedError::LockPoisoned)?;
                model_guard
                    .embed(batch, None)
                    .map_err(EmbedError::embedding_gen)
            })
            .await??;

            all_embeddings.extend(batch_embeddings);
        }

        let result = EmbeddingResult::new(all_embeddings);
        validate_embeddings(&result, texts.len(), self.dimension)?;

        tracing::debug!("Generated {} embeddings", result.len());
        Ok(result)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
