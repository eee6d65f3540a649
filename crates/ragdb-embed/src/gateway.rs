use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::config::EmbeddingConfig;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::{Chunk, EmbeddedChunk};
use ragdb_core::{CallContext, Degradation, Error, Outcome, Result};

use crate::cache::{hash_content, EmbeddingCache};

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    max_input_chars: usize,
    concurrency: usize,
    timeout: Option<Duration>,
    cache: Option<EmbeddingCache>,
}

struct Pending {
    slot: usize,
    text: String,
    hash: String,
}

impl EmbeddingGateway {
    /// Wraps `provider`. Its dimension must match the configured one.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Result<Self> {
        if provider.dim() != config.dimension {
            return Err(Error::InvalidConfig(format!(
                "embedder {} produces {} dimensions, configuration expects {}",
                provider.id(),
                provider.dim(),
                config.dimension
            )));
        }
        if config.batch_size == 0 || config.concurrency == 0 {
            return Err(Error::InvalidConfig("embedding batch_size and concurrency must be positive".into()));
        }
        let max_input_chars = config.max_input_chars.min(provider.max_len()).max(1);
        Ok(Self {
            provider,
            dimension: config.dimension,
            batch_size: config.batch_size,
            max_input_chars,
            concurrency: config.concurrency,
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
            cache: (config.cache_capacity > 0).then(|| EmbeddingCache::new(config.cache_capacity)),
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(crate::providers::build_provider(config)?, config)
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension]
    }

    pub fn verify_dimension(&self, vector: &[f32]) -> bool {
        vector.len() == self.dimension
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    /// One vector per input, always of the configured dimension.
    ///
    /// Blank inputs get the zero vector without a provider call. A failed,
    /// interrupted or malformed batch gets zero vectors for all its texts and
    /// a degradation entry; the other batches are unaffected.
    pub async fn embed(&self, ctx: &CallContext, texts: &[String]) -> Outcome<Vec<Vec<f32>>> {
        let mut vectors = vec![self.zero_vector(); texts.len()];
        let mut issues = Vec::new();

        let mut misses = Vec::new();
        for (slot, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                continue;
            }
            let text: String = text.chars().take(self.max_input_chars).collect();
            let hash = hash_content(&text);
            match self.cache.as_ref().and_then(|c| c.get(self.provider.id(), &hash)) {
                Some(hit) => vectors[slot] = hit,
                None => misses.push(Pending { slot, text, hash }),
            }
        }
        if misses.is_empty() {
            return Outcome { value: vectors, issues };
        }

        let batch_ctx = ctx.bounded(self.timeout);
        let results: Vec<_> = stream::iter(misses.chunks(self.batch_size))
            .map(|batch| {
                let batch_ctx = &batch_ctx;
                async move {
                    let inputs: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
                    (batch, batch_ctx.guard(self.provider.embed_batch(&inputs)).await)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (batch, result) in results {
            match result {
                Err(why) => {
                    tracing::warn!(embedder = self.provider.id(), size = batch.len(), %why, "embedding batch interrupted");
                    issues.push(Degradation::Interrupted(why));
                }
                Ok(Err(e)) => {
                    tracing::warn!(embedder = self.provider.id(), size = batch.len(), error = %e, "embedding batch failed, using zero vectors");
                    issues.push(Degradation::Provider(format!("embedding batch failed: {e}")));
                }
                Ok(Ok(embs)) if embs.len() != batch.len() => {
                    tracing::warn!(embedder = self.provider.id(), expected = batch.len(), got = embs.len(), "embedder returned wrong count");
                    issues.push(Degradation::Provider(format!(
                        "embedder returned {} vectors for {} texts",
                        embs.len(),
                        batch.len()
                    )));
                }
                Ok(Ok(embs)) => {
                    tracing::debug!(embedder = self.provider.id(), size = batch.len(), "embedded batch");
                    for (pending, v) in batch.iter().zip(embs) {
                        if !self.verify_dimension(&v) {
                            issues.push(Degradation::Provider(format!(
                                "dim mismatch: got {} expected {}",
                                v.len(),
                                self.dimension
                            )));
                            continue;
                        }
                        if let Some(cache) = &self.cache {
                            cache.put(self.provider.id(), &pending.hash, &v);
                        }
                        vectors[pending.slot] = v;
                    }
                }
            }
        }
        Outcome { value: vectors, issues }
    }

    pub async fn embed_one(&self, ctx: &CallContext, text: &str) -> Outcome<Vec<f32>> {
        let Outcome { value, issues } = self.embed(ctx, &[text.to_string()]).await;
        let vector = value.into_iter().next().unwrap_or_else(|| self.zero_vector());
        Outcome { value: vector, issues }
    }

    /// Pairs every chunk with its vector; failed chunks carry the zero vector.
    pub async fn embed_chunks(&self, ctx: &CallContext, chunks: Vec<Chunk>) -> Outcome<Vec<EmbeddedChunk>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        self.embed(ctx, &texts)
            .await
            .map(|vectors| chunks.into_iter().zip(vectors).map(|(chunk, vector)| EmbeddedChunk { chunk, vector }).collect())
    }
}
