//! Embedding gateway and providers.
//!
//! [`EmbeddingGateway`] is the only way the engine turns text into vectors:
//! it batches, caches, bounds concurrency and replaces every failed vector
//! with the zero vector so callers always get one vector per input.

pub mod cache;
pub mod gateway;
pub mod providers;

pub use cache::EmbeddingCache;
pub use gateway::EmbeddingGateway;
pub use providers::{build_provider, HashEmbedder, OpenAiEmbedder};
