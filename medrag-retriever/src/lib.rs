//! medrag-retriever: retrieval core for medical question answering
//!
//! This crate builds a dense vector index over a medical Q&A dataset and
//! serves similarity queries against it, packing the best matching chunks
//! into a bounded context for an answer generator.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Index building, vector search, query engine and context assembly
//! - **[`storage`]**: The paired on-disk artifact (vector store + metadata)
//! - **[`config`]**: `medrag.toml` configuration, resolved once at startup
//! - **[`answer`]** and **[`qa`]**: Answer generation on top of retrieval
//! - **[`status`]**: Index diagnostics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medrag_retriever::config::RetrieverConfig;
//! use medrag_retriever::retrieval::retriever::{QueryRequest, Retriever};
//! use medrag_retriever::storage::IndexArtifact;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::load(Path::new("medrag.toml"))?;
//! let artifact =
//!     IndexArtifact::load_with_timeout(config.index.paths(), config.index.io_timeout()).await?;
//! let provider = config.embedding.create_provider().await?;
//! let retriever = Retriever::new(Arc::new(artifact), provider)?;
//!
//! let response = retriever
//!     .answer_context(&QueryRequest {
//!         query_text: "What causes iron deficiency anemia?".to_string(),
//!         top_k: config.retrieval.top_k,
//!         max_context_chars: config.retrieval.max_context_chars,
//!     })
//!     .await?;
//! println!("confidence {:.2}", response.confidence);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Dataset → RecordChunker → EmbeddingProvider → VectorIndex → IndexArtifact (disk)
//!                                                                  ↓
//! AnswerGenerator ← ContextAssembler ← Retriever ← EmbeddingProvider (query)
//! ```

pub mod answer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod qa;
pub mod retrieval;
pub mod status;
pub mod storage;

pub use error::{Result, RetrieverError};
