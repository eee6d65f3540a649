use std::sync::Arc;
use std::time::Duration;

use ragdb_core::config::{Metric, VectorDbConfig};
use ragdb_core::types::{Chunk, EmbeddedChunk, SearchResult, SourceKind};
use ragdb_core::{CallContext, Degradation, Outcome, Result};

use crate::backend::{build_backend, FilterField, MatchFilter, VectorBackend, VectorRecord};

/// Thin, swappable front of a [`VectorBackend`].
///
/// One physical collection holds every knowledge base; `kb_id` is the
/// partition key. Backend failures never propagate: each call logs, returns a
/// zero/empty value and records a [`Degradation`]. Callers compare returned
/// counts against what they expected.
pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    collection: String,
    dimension: usize,
    metric: Metric,
    timeout: Option<Duration>,
}

impl VectorStore {
    pub fn new(backend: Arc<dyn VectorBackend>, collection: impl Into<String>, dimension: usize, metric: Metric) -> Self {
        Self { backend, collection: collection.into(), dimension, metric, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn from_config(config: &VectorDbConfig, dimension: usize) -> Result<Self> {
        let backend = build_backend(config).await?;
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        Ok(Self::new(backend, config.collection.clone(), dimension, config.metric).with_timeout(timeout))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Runs one backend call under the context and the store timeout, folding
    /// every failure into `fallback` plus a degradation.
    async fn call<T, F>(&self, ctx: &CallContext, op: &str, fallback: T, fut: F) -> Outcome<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match ctx.bounded(self.timeout).guard(fut).await {
            Ok(Ok(value)) => Outcome::ok(value),
            Ok(Err(e)) => {
                tracing::warn!(backend = self.backend.name(), collection = %self.collection, op, error = %e, "vector backend call failed");
                Outcome::degraded(fallback, Degradation::Backend(format!("{op}: {e}")))
            }
            Err(why) => {
                tracing::warn!(backend = self.backend.name(), collection = %self.collection, op, %why, "vector backend call interrupted");
                Outcome::degraded(fallback, Degradation::Interrupted(why))
            }
        }
    }

    /// Idempotent.
    pub async fn create_collection(&self, ctx: &CallContext) -> Outcome<()> {
        self.call(ctx, "create_collection", (), self.backend.create_collection(&self.collection, self.dimension, self.metric)).await
    }

    pub async fn has_collection(&self, ctx: &CallContext) -> Outcome<bool> {
        self.call(ctx, "has_collection", false, self.backend.has_collection(&self.collection)).await
    }

    /// Writes `chunks` under `kb_id` and returns how many were written.
    pub async fn insert(&self, ctx: &CallContext, chunks: &[EmbeddedChunk], kb_id: &str) -> Outcome<usize> {
        if chunks.is_empty() {
            return Outcome::ok(0);
        }
        let mut issues = Vec::new();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .map(|e| {
                let vector = if e.vector.len() == self.dimension {
                    e.vector.clone()
                } else {
                    tracing::warn!(chunk_id = %e.chunk.chunk_id, got = e.vector.len(), expected = self.dimension, "dim mismatch, storing zero vector");
                    issues.push(Degradation::Provider(format!("dim mismatch for {}", e.chunk.chunk_id)));
                    vec![0.0; self.dimension]
                };
                let mut chunk = e.chunk.clone();
                chunk.kb_id = kb_id.to_string();
                VectorRecord {
                    chunk_id: chunk.chunk_id.clone(),
                    kb_id: chunk.kb_id.clone(),
                    doc_id: chunk.doc_id.clone(),
                    content: chunk.content.clone(),
                    metadata: chunk.result_metadata(),
                    vector,
                }
            })
            .collect();
        let mut out = self.call(ctx, "insert", 0, self.backend.insert(&self.collection, records)).await;
        issues.append(&mut out.issues);
        out.issues = issues;
        if !out.is_degraded() {
            tracing::debug!(collection = %self.collection, kb_id, inserted = out.value, "vectors inserted");
        }
        out
    }

    /// Nearest neighbours of `vector`, optionally limited to `kb_ids`.
    ///
    /// `None` searches every partition; an empty list matches nothing.
    pub async fn search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        top_k: usize,
        kb_ids: Option<&[String]>,
    ) -> Outcome<Vec<SearchResult>> {
        if kb_ids.is_some_and(|ids| ids.is_empty()) || top_k == 0 {
            return Outcome::ok(Vec::new());
        }
        let filter = kb_ids.map(MatchFilter::kb_ids);
        self.call(ctx, "search", Vec::new(), self.backend.search(&self.collection, vector, top_k, filter.as_ref()))
            .await
            .map(|hits| {
                hits.into_iter()
                    .map(|hit| SearchResult {
                        chunk_id: hit.record.chunk_id,
                        content: hit.record.content,
                        score: hit.score,
                        metadata: Some(hit.record.metadata),
                        source: SourceKind::Vector,
                    })
                    .collect()
            })
    }

    pub async fn delete(&self, ctx: &CallContext, chunk_ids: &[String]) -> Outcome<usize> {
        if chunk_ids.is_empty() {
            return Outcome::ok(0);
        }
        let filter = MatchFilter::new(FilterField::ChunkId, chunk_ids.to_vec());
        self.call(ctx, "delete", 0, self.backend.delete(&self.collection, &filter)).await
    }

    /// Stored rows for `chunk_ids`, vectors included.
    pub async fn fetch_records(&self, ctx: &CallContext, chunk_ids: &[String]) -> Outcome<Vec<VectorRecord>> {
        if chunk_ids.is_empty() {
            return Outcome::ok(Vec::new());
        }
        let filter = MatchFilter::new(FilterField::ChunkId, chunk_ids.to_vec());
        self.call(ctx, "fetch_records", Vec::new(), self.backend.scan(&self.collection, Some(&filter))).await
    }

    /// Writes rows back exactly as [`Self::fetch_records`] returned them.
    pub async fn restore(&self, ctx: &CallContext, records: Vec<VectorRecord>) -> Outcome<usize> {
        if records.is_empty() {
            return Outcome::ok(0);
        }
        self.call(ctx, "restore", 0, self.backend.insert(&self.collection, records)).await
    }

    pub async fn delete_by_doc_id(&self, ctx: &CallContext, doc_id: &str) -> Outcome<usize> {
        let filter = MatchFilter::new(FilterField::DocId, vec![doc_id.to_string()]);
        self.call(ctx, "delete_by_doc_id", 0, self.backend.delete(&self.collection, &filter)).await
    }

    pub async fn delete_by_kb_id(&self, ctx: &CallContext, kb_id: &str) -> Outcome<usize> {
        let filter = MatchFilter::new(FilterField::KbId, vec![kb_id.to_string()]);
        self.call(ctx, "delete_by_kb_id", 0, self.backend.delete(&self.collection, &filter)).await
    }

    pub async fn count(&self, ctx: &CallContext, kb_id: Option<&str>) -> Outcome<usize> {
        let filter = kb_id.map(|id| MatchFilter::new(FilterField::KbId, vec![id.to_string()]));
        self.call(ctx, "count", 0, self.backend.count(&self.collection, filter.as_ref())).await
    }

    pub async fn drop_collection(&self, ctx: &CallContext) -> Outcome<()> {
        self.call(ctx, "drop_collection", (), self.backend.drop_collection(&self.collection)).await
    }

    /// Every stored chunk, in storage order. Used to rebuild derived indexes.
    pub async fn fetch_all_chunks(&self, ctx: &CallContext, kb_ids: Option<&[String]>) -> Outcome<Vec<Chunk>> {
        if kb_ids.is_some_and(|ids| ids.is_empty()) {
            return Outcome::ok(Vec::new());
        }
        let filter = kb_ids.map(MatchFilter::kb_ids);
        self.call(ctx, "scan", Vec::new(), self.backend.scan(&self.collection, filter.as_ref()))
            .await
            .map(|rows| rows.into_iter().map(|r| Chunk::from_stored(r.chunk_id, r.content, &r.metadata)).collect())
    }
}
