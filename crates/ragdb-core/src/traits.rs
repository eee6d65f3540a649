use async_trait::async_trait;
use std::path::Path;

use crate::types::Meta;

/// Turns text into dense vectors. Implementations talk to a model or a remote
/// API and may fail; the embedding gateway absorbs those failures.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier (provider + model), used as the cache namespace.
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Longest input, in characters, the provider accepts.
    fn max_len(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// One entry of a rerank response: position in the submitted documents plus
/// the provider's relevance score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn id(&self) -> &str;
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> anyhow::Result<Vec<RerankHit>>;
}

/// Plain text plus source metadata extracted from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub content: String,
    pub metadata: Meta,
}

/// Extracts text from a file. Unsupported types and missing files are errors.
pub trait DocumentLoader: Send + Sync {
    fn supports(&self, path: &Path) -> bool;
    fn load(&self, path: &Path) -> anyhow::Result<LoadedDocument>;
}
