use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use ragdb_core::config::{FusionMethod, RetrievalConfig};
use ragdb_core::types::{is_zero_vector, Chunk, SearchResult};
use ragdb_core::{CallContext, Degradation, Outcome};
use ragdb_text::{Bm25Params, LexicalIndex};
use ragdb_vector::VectorStore;

use crate::fusion::reciprocal_rank_fusion;

/// Chunks known to the lexical side, in ingestion order.
#[derive(Default)]
struct Corpus {
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl Corpus {
    fn upsert(&mut self, chunk: Chunk) {
        match self.positions.get(&chunk.chunk_id) {
            Some(&at) => self.chunks[at] = chunk,
            None => {
                self.positions.insert(chunk.chunk_id.clone(), self.chunks.len());
                self.chunks.push(chunk);
            }
        }
    }

    fn retain(&mut self, keep: impl Fn(&Chunk) -> bool) -> Vec<Chunk> {
        let (kept, removed): (Vec<Chunk>, Vec<Chunk>) = std::mem::take(&mut self.chunks).into_iter().partition(|c| keep(c));
        self.chunks = kept;
        self.positions = self.chunks.iter().enumerate().map(|(i, c)| (c.chunk_id.clone(), i)).collect();
        removed
    }
}

/// Vector store plus lexical index, fused with RRF.
///
/// The lexical index is rebuilt from the whole corpus on every change while
/// the corpus write lock is held, then swapped in. Readers clone the current
/// `Arc` and never observe a half-built index.
pub struct HybridRetriever {
    store: Arc<VectorStore>,
    config: RetrievalConfig,
    corpus: RwLock<Corpus>,
    index: RwLock<Arc<LexicalIndex>>,
}

impl HybridRetriever {
    pub fn new(store: Arc<VectorStore>, config: &RetrievalConfig) -> Self {
        let params = Bm25Params { k1: config.k1, b: config.b };
        Self {
            store,
            config: config.clone(),
            corpus: RwLock::new(Corpus::default()),
            index: RwLock::new(Arc::new(LexicalIndex::new(params))),
        }
    }

    fn params(&self) -> Bm25Params {
        Bm25Params { k1: self.config.k1, b: self.config.b }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Snapshot of the current lexical index.
    pub async fn lexical(&self) -> Arc<LexicalIndex> {
        self.index.read().await.clone()
    }

    pub async fn corpus_len(&self) -> usize {
        self.corpus.read().await.chunks.len()
    }

    /// The known chunks matching `filter`, in corpus order.
    pub async fn chunks_where(&self, filter: impl Fn(&Chunk) -> bool) -> Vec<Chunk> {
        self.corpus.read().await.chunks.iter().filter(|c| filter(c)).cloned().collect()
    }

    async fn rebuild(&self, corpus: &Corpus) {
        let fresh = Arc::new(LexicalIndex::build(self.params(), &corpus.chunks));
        *self.index.write().await = fresh;
    }

    /// Replaces the corpus with `chunks` and rebuilds the lexical index.
    pub async fn index_documents(&self, chunks: Vec<Chunk>) {
        let mut corpus = self.corpus.write().await;
        *corpus = Corpus::default();
        for chunk in chunks {
            corpus.upsert(chunk);
        }
        self.rebuild(&corpus).await;
        tracing::info!(chunks = corpus.chunks.len(), "lexical corpus replaced");
    }

    /// Adds (or replaces by id) `chunks` and rebuilds over the full corpus.
    pub async fn add_chunks(&self, chunks: &[Chunk]) {
        if chunks.is_empty() {
            return;
        }
        let mut corpus = self.corpus.write().await;
        for chunk in chunks {
            corpus.upsert(chunk.clone());
        }
        self.rebuild(&corpus).await;
        tracing::debug!(added = chunks.len(), corpus = corpus.chunks.len(), "lexical index rebuilt");
    }

    async fn remove_where(&self, doomed: impl Fn(&Chunk) -> bool) -> Vec<Chunk> {
        let mut corpus = self.corpus.write().await;
        let removed = corpus.retain(|c| !doomed(c));
        if !removed.is_empty() {
            self.rebuild(&corpus).await;
        }
        removed
    }

    /// Removes chunks by id. Returns the removed chunks.
    pub async fn remove_chunks(&self, chunk_ids: &[String]) -> Vec<Chunk> {
        let ids: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
        self.remove_where(|c| ids.contains(c.chunk_id.as_str())).await
    }

    pub async fn remove_document(&self, doc_id: &str) -> Vec<Chunk> {
        self.remove_where(|c| c.doc_id == doc_id).await
    }

    pub async fn remove_knowledge_base(&self, kb_id: &str) -> Vec<Chunk> {
        self.remove_where(|c| c.kb_id == kb_id).await
    }

    pub async fn reset(&self) {
        let mut corpus = self.corpus.write().await;
        *corpus = Corpus::default();
        self.rebuild(&corpus).await;
    }

    /// Ranked candidates for `query`.
    ///
    /// With hybrid mode off, or fusion set to `vector`, only the vector leg
    /// runs. Otherwise both legs run and are fused with RRF, each leg asking
    /// for at least `top_k` candidates. A zero `query_vector` skips the
    /// vector leg and marks the result degraded.
    pub async fn retrieve(
        &self,
        ctx: &CallContext,
        query: &str,
        query_vector: &[f32],
        top_k: usize,
        kb_ids: Option<&[String]>,
    ) -> Outcome<Vec<SearchResult>> {
        if top_k == 0 {
            return Outcome::ok(Vec::new());
        }
        let mut issues = Vec::new();
        let vector_usable = !is_zero_vector(query_vector);
        if !vector_usable && !query.trim().is_empty() {
            issues.push(Degradation::Provider("query embedding unavailable, vector search skipped".into()));
        }

        let hybrid = self.config.hybrid && self.config.fusion == FusionMethod::Rrf;
        if !hybrid {
            let results = if vector_usable {
                self.store.search(ctx, query_vector, top_k, kb_ids).await.drain_into(&mut issues)
            } else {
                Vec::new()
            };
            return Outcome { value: results, issues };
        }

        let vector_hits = if vector_usable {
            let want = self.config.vector_top_k.max(top_k);
            self.store.search(ctx, query_vector, want, kb_ids).await.drain_into(&mut issues)
        } else {
            Vec::new()
        };
        let lexical_hits = self.lexical().await.search(query, self.config.bm25_top_k.max(top_k), kb_ids);
        tracing::debug!(vector = vector_hits.len(), lexical = lexical_hits.len(), "fusing candidates");

        let fused = reciprocal_rank_fusion(&[vector_hits.as_slice(), lexical_hits.as_slice()], self.config.rrf_k, top_k);
        Outcome { value: fused, issues }
    }
}
