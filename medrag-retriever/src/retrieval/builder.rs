//! Index builder: records in, persisted index artifact out.
//!
//! ## Pipeline Flow
//!
//! ```text
//! MedicalRecord → RecordChunker → EmbeddingProvider → VectorIndex → IndexArtifact
//!   (in order)     (chunk_index)    (batched, retried)  (normalized)  (paired save)
//! ```
//!
//! Records are processed in input order and the chunks of a record in
//! `chunk_index` order, so position `i` of the finished index is reproducible
//! for identical input and provider. Embedding batches may be in flight
//! concurrently, but results are reassembled in submission order; batch size
//! and concurrency only affect throughput.
//!
//! A provider that keeps failing aborts the build. Nothing is written to disk
//! until every vector has been produced.

use crate::config::{ArtifactPaths, RetrieverConfig};
use crate::error::{Result, RetrieverError};
use crate::retrieval::policy::ProviderPolicy;
use crate::retrieval::vector_index::VectorIndex;
use crate::storage::{Chunk, EmbeddingModelMetadata, IndexArtifact};
use futures::{StreamExt, TryStreamExt, stream};
use medrag_context::{ChunkConfig, MedicalRecord, RecordChunker};
use medrag_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, validate_embeddings};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Statistics about one index build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub records_processed: usize,
    pub chunks_created: usize,
    pub embedding_batches: usize,
    pub elapsed_ms: u64,
}

pub struct IndexBuilder {
    chunker: RecordChunker,
    provider: Arc<dyn EmbeddingProvider>,
    policy: ProviderPolicy,
    batch_size: usize,
    concurrency: usize,
    source: String,
    progress_every: usize,
}

impl IndexBuilder {
    pub fn new(chunk_config: ChunkConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Ok(Self {
            chunker: RecordChunker::new(chunk_config)?,
            provider,
            policy: ProviderPolicy::default(),
            batch_size: medrag_embed::DEFAULT_BATCH_SIZE,
            concurrency: 1,
            source: "medical_dataset".to_string(),
            progress_every: 1000,
        })
    }

    /// Create a builder from the `[chunking]` and `[embedding]` sections.
    pub fn from_config(config: &RetrieverConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Ok(Self::new(config.chunking.chunk_config()?, provider)?
            .with_policy(config.embedding.policy())
            .with_batch_size(config.embedding.batch_size)
            .with_concurrency(config.embedding.concurrency)
            .with_source(config.chunking.source.clone())
            .with_progress_every(config.chunking.progress_every))
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the number of texts per provider call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the number of provider calls in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Log progress every `every` records (0 disables progress logging)
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunker.config()
    }

    /// Chunk all records in order.
    pub fn chunk_records(&self, records: &[MedicalRecord]) -> Vec<Chunk> {
        let total = records.len();
        let mut chunks = Vec::new();
        for (record_index, record) in records.iter().enumerate() {
            if self.progress_every > 0 && record_index % self.progress_every == 0 {
                info!(
                    "Chunking record {}/{} ({} chunks so far)",
                    record_index + 1,
                    total,
                    chunks.len()
                );
            }
            chunks.extend(self.chunker.chunk(record_index, record, &self.source));
        }
        info!("Created {} chunks from {} records", chunks.len(), total);
        chunks
    }

    /// Build an in-memory artifact from `records`.
    pub async fn build(&self, records: &[MedicalRecord]) -> Result<(IndexArtifact, BuildStats)> {
        let started = Instant::now();
        let model = EmbeddingModelMetadata::of(self.provider.as_ref());
        let mut index = VectorIndex::new(model.dimension)?;

        let chunks = self.chunk_records(records);
        let texts: Vec<String> = chunks.iter().map(|c| c.chunk_text.clone()).collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let batch_count = batches.len();
        info!(
            "Embedding {} chunks in {} batches with {} ({})",
            texts.len(),
            batch_count,
            model.provider,
            model.model_name
        );

        let results: Vec<EmbeddingResult> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_index, batch)| self.embed_batch(batch_index, batch_count, batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = results.into_iter().flat_map(|r| r.embeddings).collect();
        index.insert(&vectors, &ids)?;

        let stats = BuildStats {
            records_processed: records.len(),
            chunks_created: chunks.len(),
            embedding_batches: batch_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let artifact = IndexArtifact::new(&model, self.chunk_config(), index, chunks)?;
        info!(
            "Built index: {} records, {} chunks in {} ms",
            stats.records_processed, stats.chunks_created, stats.elapsed_ms
        );
        Ok((artifact, stats))
    }

    /// Build and persist the artifact. Nothing is written if the build fails.
    pub async fn build_and_save(
        &self,
        records: &[MedicalRecord],
        paths: &ArtifactPaths,
        io_timeout: Duration,
    ) -> Result<(Arc<IndexArtifact>, BuildStats)> {
        let (artifact, stats) = self.build(records).await?;
        let artifact = Arc::new(artifact);
        IndexArtifact::save_with_timeout(Arc::clone(&artifact), paths.clone(), io_timeout).await?;
        Ok((artifact, stats))
    }

    async fn embed_batch(
        &self,
        batch_index: usize,
        batch_count: usize,
        batch: &[String],
    ) -> Result<EmbeddingResult> {
        let provider = self.provider.as_ref();
        let dimension = provider.embedding_dimension();
        let operation = format!("embedding batch {}/{}", batch_index + 1, batch_count);

        let result = self
            .policy
            .run(&operation, move || async move {
                let result = provider.embed_texts(batch).await?;
                validate_embeddings(&result, batch.len(), dimension)?;
                Ok::<_, EmbedError>(result)
            })
            .await
            .map_err(|e| match e {
                RetrieverError::ProviderUnavailable { attempts, message } => {
                    RetrieverError::ProviderUnavailable {
                        attempts,
                        message: format!("{operation}: {message}"),
                    }
                }
                other => other,
            })?;

        debug!("Finished {operation}");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::test_support::{DownProvider, FlakyProvider};
    use medrag_embed::HashingEmbedder;
    use tracing_test::traced_test;

    fn records(n: usize) -> Vec<MedicalRecord> {
        (0..n)
            .map(|i| {
                MedicalRecord::new(
                    format!("Question {i} about symptom{i} and treatment{i}?"),
                    format!("Reasoning step for case {i}. ").repeat(i % 4 + 1),
                    format!("Answer {i}."),
                )
            })
            .collect()
    }

    fn hashing() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder::new(64).unwrap())
    }

    fn fast_policy() -> ProviderPolicy {
        ProviderPolicy::new(Duration::from_millis(200), 2)
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_positions_follow_record_and_chunk_order() {
        let builder = IndexBuilder::new(ChunkConfig::new(60, 10).unwrap(), hashing())
            .unwrap()
            .with_batch_size(3);
        let (artifact, stats) = builder.build(&records(6)).await.unwrap();

        assert_eq!(stats.records_processed, 6);
        assert_eq!(stats.chunks_created, artifact.len());
        assert!(artifact.len() > 6);

        let mut previous = (0usize, None::<usize>);
        for (position, chunk) in artifact.chunks().iter().enumerate() {
            assert_eq!(artifact.index().ids()[position], chunk.id);
            assert_eq!(chunk.id, format!("{}_{}", chunk.record_index, chunk.chunk_index));
            let expected_chunk = match previous {
                (record, Some(last)) if record == chunk.record_index => last + 1,
                _ => 0,
            };
            assert!(chunk.record_index >= previous.0);
            assert_eq!(chunk.chunk_index, expected_chunk);
            previous = (chunk.record_index, Some(chunk.chunk_index));

            // The vector at `position` is the embedding of this chunk's text.
            let expected = HashingEmbedder::new(64).unwrap().embed_one(&chunk.chunk_text);
            let stored = artifact.index().vector(position).unwrap();
            for (a, b) in stored.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_batching_does_not_change_result() {
        let data = records(9);
        let config = ChunkConfig::new(80, 20).unwrap();

        let (serial, _) = IndexBuilder::new(config, hashing())
            .unwrap()
            .with_batch_size(1)
            .build(&data)
            .await
            .unwrap();
        let (parallel, stats) = IndexBuilder::new(config, hashing())
            .unwrap()
            .with_batch_size(7)
            .with_concurrency(4)
            .build(&data)
            .await
            .unwrap();

        assert_eq!(serial.index(), parallel.index());
        assert_eq!(serial.chunks(), parallel.chunks());
        assert_eq!(serial.header().vector_checksum, parallel.header().vector_checksum);
        assert_eq!(stats.embedding_batches, parallel.len().div_ceil(7));
    }

    #[tokio::test]
    async fn test_empty_input_builds_empty_index() {
        let builder = IndexBuilder::new(ChunkConfig::default(), hashing()).unwrap();
        let (artifact, stats) = builder.build(&[]).await.unwrap();
        assert!(artifact.is_empty());
        assert_eq!(stats.embedding_batches, 0);
        assert_eq!(artifact.index().dimension(), 64);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(FlakyProvider::new(16, 1));
        let builder = IndexBuilder::new(ChunkConfig::default(), provider.clone())
            .unwrap()
            .with_policy(fast_policy());

        let (artifact, _) = builder.build(&records(2)).await.unwrap();
        assert_eq!(artifact.len(), 2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path().join("vector_db"));
        let builder = IndexBuilder::new(ChunkConfig::default(), Arc::new(DownProvider { dimension: 8 }))
            .unwrap()
            .with_policy(fast_policy());

        let err = builder
            .build_and_save(&records(3), &paths, Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            RetrieverError::ProviderUnavailable { attempts, message } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("service unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!paths.dir.exists());
    }

    #[tokio::test]
    async fn test_build_and_save_persists_pair() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path().join("vector_db"));
        let builder = IndexBuilder::new(ChunkConfig::default(), hashing()).unwrap();

        let (artifact, _) = builder
            .build_and_save(&records(4), &paths, Duration::from_secs(5))
            .await
            .unwrap();
        let loaded = IndexArtifact::load(&paths).unwrap();
        assert_eq!(&loaded, artifact.as_ref());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_progress_is_logged() {
        let builder = IndexBuilder::new(ChunkConfig::default(), hashing())
            .unwrap()
            .with_progress_every(2);
        builder.build(&records(5)).await.unwrap();

        assert!(logs_contain("Chunking record 1/5"));
        assert!(logs_contain("Chunking record 3/5"));
        assert!(logs_contain("Chunking record 5/5"));
        assert!(logs_contain("Built index: 5 records"));
    }
}
