//! # medrag-embed
//!
//! Text embedding providers for the medical retrieval pipeline. Designed for
//! async operation with a single trait, [`EmbeddingProvider`], that the index
//! builder and the retriever consume without caring which model is behind it.
//!
//! ## Features
//!
//! - **Local ONNX Models**: [`FastEmbedProvider`] runs sentence embedding models
//!   locally through FastEmbed, `all-MiniLM-L6-v2` by default
//! - **Offline Hashing**: [`HashingEmbedder`] is a deterministic, dependency-free
//!   provider for tests and air-gapped builds
//! - **Async-First Design**: model inference runs on blocking threads so callers
//!   can bound it with timeouts
//!
//! ## Quick Start
//!
//! ```no_run
//! use medrag_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(
//!     EmbedConfig::default().with_cache_dir("/tmp/models")
//! ).await?;
//!
//! let texts = vec!["What causes anemia?".to_string(), "How is gout treated?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

// Re-export main types for easy access
pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_MODEL_NAME, EmbedConfig, EmbedConfigBuilder};
pub use error::{EmbedError, Result};
pub use hashing::{HASHING_MODEL_NAME, HashingEmbedder};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, validate_embeddings};
