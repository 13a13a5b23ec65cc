//! Query engine over a loaded index artifact.
//!
//! A [`Retriever`] holds the artifact behind an `Arc`, so any number of
//! concurrent queries share the same vectors and chunk list without copying.
//! Nothing in this module mutates the artifact.
//!
//! Query-time provider failures are not errors: once the retry policy is
//! exhausted, [`Retriever::query`] returns an empty result with confidence
//! `0.0` and a message explaining why, so the caller can still answer
//! gracefully.

use crate::error::{Result, RetrieverError};
use crate::retrieval::context::{ContextAssembler, SourceRef};
use crate::retrieval::policy::ProviderPolicy;
use crate::retrieval::vector_index::SearchHit;
use crate::storage::{Chunk, IndexArtifact};
use medrag_embed::{EmbedError, EmbeddingProvider, validate_embeddings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Message attached to results that found nothing to ground an answer on.
pub const NO_GROUNDING_MESSAGE: &str = "No relevant information found in the knowledge base.";

/// A chunk returned by a query, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Position of the chunk in the index
    pub position: usize,
}

/// Ranked chunks plus a confidence summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Descending score order, ties by index position
    pub results: Vec<RetrievedChunk>,
    pub confidence: f32,
    /// Why the result is empty, when it is
    pub message: Option<String>,
    /// Set when the embedding provider could not be reached
    pub degraded: bool,
}

impl RetrievalResult {
    fn empty(message: impl Into<String>, degraded: bool) -> Self {
        Self {
            results: Vec::new(),
            confidence: 0.0,
            message: Some(message.into()),
            degraded,
        }
    }

    /// True when at least one chunk was found.
    pub fn is_grounded(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn scores(&self) -> Vec<f32> {
        self.results.iter().map(|r| r.score).collect()
    }
}

/// Input of the answer-context interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    pub top_k: usize,
    pub max_context_chars: usize,
}

/// Output of the answer-context interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer_context: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Heuristic confidence for a set of similarity scores.
///
/// `min(mean(scores) * 2, 1)`, clamped at 0 for negative means; an empty set
/// scores 0. Relevant matches in normalized embedding spaces tend to land
/// around 0.3 to 0.6, which this maps into the upper half of `[0, 1]`. It is
/// not a calibrated probability.
pub fn confidence(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    (mean * 2.0).clamp(0.0, 1.0)
}

pub struct Retriever {
    artifact: Arc<IndexArtifact>,
    provider: Arc<dyn EmbeddingProvider>,
    policy: ProviderPolicy,
    assembler: ContextAssembler,
}

impl Retriever {
    /// Pair a loaded artifact with the provider used to embed queries.
    ///
    /// Fails with [`RetrieverError::DimensionMismatch`] when the provider's
    /// vectors cannot be compared with the stored ones.
    pub fn new(artifact: Arc<IndexArtifact>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let expected = artifact.index().dimension();
        let actual = provider.embedding_dimension();
        if expected != actual {
            return Err(RetrieverError::DimensionMismatch { expected, actual });
        }

        let header = artifact.header();
        if header.embedding_model_name != provider.model_name() {
            warn!(
                "Index was built with model '{}' but queries use '{}'",
                header.embedding_model_name,
                provider.model_name()
            );
        }

        Ok(Self {
            artifact,
            provider,
            policy: ProviderPolicy::default(),
            assembler: ContextAssembler::default(),
        })
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn artifact(&self) -> &Arc<IndexArtifact> {
        &self.artifact
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    /// Search with an already embedded query.
    pub fn search_vector(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let hits = self.artifact.index().search(query, top_k)?;
        Ok(self.resolve_hits(hits))
    }

    // Positions without a chunk are dropped rather than treated as errors.
    fn resolve_hits(&self, hits: Vec<SearchHit>) -> Vec<RetrievedChunk> {
        hits.into_iter()
            .filter_map(|hit| match self.artifact.chunk(hit.position) {
                Some(chunk) => Some(RetrievedChunk {
                    chunk: chunk.clone(),
                    score: hit.score,
                    position: hit.position,
                }),
                None => {
                    warn!("Dropping search hit at out-of-range position {}", hit.position);
                    None
                }
            })
            .collect()
    }

    /// Embed `text` and return the `top_k` most similar chunks.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Err(RetrieverError::invalid_input("top_k must be greater than zero"));
        }
        if self.artifact.is_empty() {
            debug!("Query against empty index");
            return Ok(RetrievalResult::empty(NO_GROUNDING_MESSAGE, false));
        }

        // Malformed output counts as a failed attempt, so it is retried and
        // then degrades like any other provider failure.
        let provider = self.provider.as_ref();
        let dimension = self.artifact.index().dimension();
        let embedded = self
            .policy
            .run("query embedding", move || async move {
                let texts = [text.to_string()];
                let result = provider.embed_texts(&texts).await?;
                validate_embeddings(&result, 1, dimension)?;
                result
                    .embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| EmbedError::invalid_output("No embedding generated for query"))
            })
            .await;
        let query_vector = match embedded {
            Ok(vector) => vector,
            Err(e @ RetrieverError::ProviderUnavailable { .. }) => {
                warn!("Returning degraded result: {e}");
                return Ok(RetrievalResult::empty(
                    format!("Retrieval unavailable: {e}"),
                    true,
                ));
            }
            Err(e) => return Err(e),
        };

        let results = self.search_vector(&query_vector, top_k)?;
        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        let confidence = confidence(&scores);
        debug!(
            "Query returned {} results with confidence {:.3}",
            results.len(),
            confidence
        );

        let message = results.is_empty().then(|| NO_GROUNDING_MESSAGE.to_string());
        Ok(RetrievalResult {
            results,
            confidence,
            message,
            degraded: false,
        })
    }

    /// Retrieve and pack context for an answer generator.
    pub async fn answer_context(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let retrieval = self.query(&request.query_text, request.top_k).await?;
        let context = self
            .assembler
            .assemble(&retrieval.results, request.max_context_chars);

        Ok(QueryResponse {
            answer_context: context.context_text,
            sources: context.sources,
            confidence: retrieval.confidence,
            message: retrieval.message,
        })
    }
}
