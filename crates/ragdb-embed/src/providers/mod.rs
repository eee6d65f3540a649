//! Concrete [`EmbeddingProvider`]s, selected once from configuration.

use std::sync::Arc;

use ragdb_core::config::{EmbeddingConfig, EmbeddingProviderKind};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::Result;

mod hash;
mod openai;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderKind::Hash => Arc::new(HashEmbedder::new(config.dimension)),
        EmbeddingProviderKind::Openai | EmbeddingProviderKind::Qwen => Arc::new(OpenAiEmbedder::from_config(config)?),
    };
    tracing::info!(embedder = provider.id(), dim = provider.dim(), "embedding provider ready");
    Ok(provider)
}
