//! Embedding providers with scripted failures, shared by unit tests.

use async_trait::async_trait;
use medrag_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, HashingEmbedder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails every call.
pub struct DownProvider {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for DownProvider {
    async fn embed_texts(&self, _texts: &[String]) -> medrag_embed::Result<EmbeddingResult> {
        Err(EmbedError::embedding_gen("service unavailable"))
    }
    fn embedding_dimension(&self) -> usize {
        self.dimension
    }
    fn provider_name(&self) -> &str {
        "down"
    }
    fn model_name(&self) -> &str {
        "down-model"
    }
}

/// Fails the first `failures` calls, then delegates to a hashing embedder.
pub struct FlakyProvider {
    pub inner: HashingEmbedder,
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(dimension: usize, failures: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension).unwrap(),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    async fn embed_texts(&self, texts: &[String]) -> medrag_embed::Result<EmbeddingResult> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(EmbedError::embedding_gen("transient failure"));
        }
        self.inner.embed_texts(texts).await
    }
    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }
    fn provider_name(&self) -> &str {
        "flaky"
    }
    fn model_name(&self) -> &str {
        "flaky-model"
    }
}

/// Sleeps before answering, to exercise timeouts.
pub struct SlowProvider {
    pub inner: HashingEmbedder,
    pub delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed_texts(&self, texts: &[String]) -> medrag_embed::Result<EmbeddingResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_texts(texts).await
    }
    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }
    fn provider_name(&self) -> &str {
        "slow"
    }
    fn model_name(&self) -> &str {
        "slow-model"
    }
}

/// Claims `dimension` but answers every text with the same fixed vector.
pub struct MalformedProvider {
    pub dimension: usize,
    pub vector: Vec<f32>,
    pub calls: AtomicUsize,
}

impl MalformedProvider {
    pub fn new(dimension: usize, vector: Vec<f32>) -> Self {
        Self {
            dimension,
            vector,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MalformedProvider {
    async fn embed_texts(&self, texts: &[String]) -> medrag_embed::Result<EmbeddingResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResult {
            embeddings: texts.iter().map(|_| self.vector.clone()).collect(),
            dimension: self.vector.len(),
        })
    }
    fn embedding_dimension(&self) -> usize {
        self.dimension
    }
    fn provider_name(&self) -> &str {
        "malformed"
    }
    fn model_name(&self) -> &str {
        "malformed-model"
    }
}
