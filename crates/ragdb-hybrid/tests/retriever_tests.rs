use async_trait::async_trait;
use std::sync::Arc;

use ragdb_core::config::{FusionMethod, Metric, RetrievalConfig};
use ragdb_core::types::{Chunk, ChunkType, EmbeddedChunk, Meta, SourceKind};
use ragdb_core::{CallContext, Degradation};
use ragdb_hybrid::HybridRetriever;
use ragdb_vector::backend::MemoryBackend;
use ragdb_vector::{MatchFilter, ScoredRecord, VectorBackend, VectorRecord, VectorStore};

const DIM: usize = 4;

/// Stores rows in memory but answers every search with a fixed ranking.
struct RankedBackend {
    inner: MemoryBackend,
    order: Vec<&'static str>,
}

#[async_trait]
impl VectorBackend for RankedBackend {
    fn name(&self) -> &str {
        "ranked"
    }
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        self.inner.has_collection(collection).await
    }
    async fn create_collection(&self, collection: &str, dimension: usize, metric: Metric) -> anyhow::Result<()> {
        self.inner.create_collection(collection, dimension, metric).await
    }
    async fn drop_collection(&self, collection: &str) -> anyhow::Result<()> {
        self.inner.drop_collection(collection).await
    }
    async fn insert(&self, collection: &str, records: Vec<VectorRecord>) -> anyhow::Result<usize> {
        self.inner.insert(collection, records).await
    }
    async fn search(
        &self,
        collection: &str,
        _vector: &[f32],
        top_k: usize,
        filter: Option<&MatchFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>> {
        let rows = self.inner.scan(collection, filter).await?;
        Ok(self
            .order
            .iter()
            .filter_map(|id| rows.iter().find(|r| r.chunk_id == *id))
            .enumerate()
            .map(|(i, r)| ScoredRecord { record: r.clone(), score: 1.0 - i as f32 * 0.1 })
            .take(top_k)
            .collect())
    }
    async fn delete(&self, collection: &str, filter: &MatchFilter) -> anyhow::Result<usize> {
        self.inner.delete(collection, filter).await
    }
    async fn count(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<usize> {
        self.inner.count(collection, filter).await
    }
    async fn scan(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<Vec<VectorRecord>> {
        self.inner.scan(collection, filter).await
    }
}

fn chunk(doc: &str, kb: &str, content: &str) -> Chunk {
    Chunk {
        chunk_id: format!("{doc}:chunk_0"),
        kb_id: kb.into(),
        doc_id: doc.into(),
        parent_id: None,
        content: content.into(),
        chunk_type: ChunkType::Simple,
        parent_index: None,
        child_index: None,
        index: Some(0),
        metadata: Meta::new(),
    }
}

async fn seeded(backend: Arc<dyn VectorBackend>, config: &RetrievalConfig, chunks: &[(Chunk, [f32; DIM])]) -> HybridRetriever {
    let store = Arc::new(VectorStore::new(backend, "test", DIM, Metric::Cosine));
    let ctx = CallContext::background();
    assert!(!store.create_collection(&ctx).await.is_degraded());
    for (c, v) in chunks {
        let e = EmbeddedChunk { chunk: c.clone(), vector: v.to_vec() };
        assert_eq!(store.insert(&ctx, &[e], &c.kb_id).await.value, 1);
    }
    let retriever = HybridRetriever::new(store, config);
    let plain: Vec<Chunk> = chunks.iter().map(|(c, _)| c.clone()).collect();
    retriever.add_chunks(&plain).await;
    retriever
}

fn apple_banana() -> Vec<(Chunk, [f32; DIM])> {
    vec![
        (chunk("A", "kb", "Apple releases new phone"), [1.0, 0.0, 0.0, 0.0]),
        (chunk("B", "kb", "Banana prices rise"), [0.0, 1.0, 0.0, 0.0]),
    ]
}

#[tokio::test]
async fn lexical_agreement_beats_single_vector_rank() {
    // The vector leg ranks B first; only A matches "Apple" lexically.
    let backend = Arc::new(RankedBackend { inner: MemoryBackend::new(), order: vec!["B:chunk_0", "A:chunk_0"] });
    let retriever = seeded(backend, &RetrievalConfig::default(), &apple_banana()).await;

    let lexical = retriever.lexical().await.search("Apple", 5, None);
    assert_eq!(lexical[0].chunk_id, "A:chunk_0");

    let out = retriever.retrieve(&CallContext::background(), "Apple", &[0.5, 0.5, 0.0, 0.0], 5, None).await;
    assert!(!out.is_degraded());
    let ids: Vec<&str> = out.value.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, ["A:chunk_0", "B:chunk_0"]);
    assert!(out.value.iter().all(|r| r.source == SourceKind::Fused));
    let expected = 1.0 / 62.0 + 1.0 / 61.0;
    assert!((out.value[0].score - expected).abs() < 1e-6);
    assert_eq!(out.value[0].content, "Apple releases new phone");
}

#[tokio::test]
async fn vector_fusion_ignores_lexical_leg() {
    let backend = Arc::new(RankedBackend { inner: MemoryBackend::new(), order: vec!["B:chunk_0", "A:chunk_0"] });
    let config = RetrievalConfig { fusion: FusionMethod::Vector, ..RetrievalConfig::default() };
    let retriever = seeded(backend, &config, &apple_banana()).await;

    let out = retriever.retrieve(&CallContext::background(), "Apple", &[0.5, 0.5, 0.0, 0.0], 5, None).await;
    assert_eq!(out.value[0].chunk_id, "B:chunk_0");
    assert_eq!(out.value[0].source, SourceKind::Vector);

    let config = RetrievalConfig { hybrid: false, ..RetrievalConfig::default() };
    let backend = Arc::new(RankedBackend { inner: MemoryBackend::new(), order: vec!["B:chunk_0"] });
    let retriever = seeded(backend, &config, &apple_banana()).await;
    let out = retriever.retrieve(&CallContext::background(), "Apple", &[0.5, 0.5, 0.0, 0.0], 5, None).await;
    assert_eq!(out.value.len(), 1);
    assert_eq!(out.value[0].chunk_id, "B:chunk_0");
}

#[tokio::test]
async fn zero_query_vector_falls_back_to_lexical() {
    let retriever = seeded(Arc::new(MemoryBackend::new()), &RetrievalConfig::default(), &apple_banana()).await;
    let out = retriever.retrieve(&CallContext::background(), "banana", &[0.0; DIM], 5, None).await;
    assert!(out.is_degraded());
    assert!(matches!(out.issues[0], Degradation::Provider(_)));
    assert_eq!(out.value.len(), 1);
    assert_eq!(out.value[0].chunk_id, "B:chunk_0");
}

#[tokio::test]
async fn kb_filter_applies_to_both_legs() {
    let chunks = vec![
        (chunk("A", "kb-a", "shared words here"), [1.0, 0.0, 0.0, 0.0]),
        (chunk("B", "kb-b", "shared words there"), [1.0, 0.1, 0.0, 0.0]),
    ];
    let retriever = seeded(Arc::new(MemoryBackend::new()), &RetrievalConfig::default(), &chunks).await;
    let only_b = ["kb-b".to_string()];
    let out = retriever.retrieve(&CallContext::background(), "shared words", &[1.0, 0.0, 0.0, 0.0], 5, Some(&only_b)).await;
    assert_eq!(out.value.len(), 1);
    assert_eq!(out.value[0].kb_id(), Some("kb-b"));
}

#[tokio::test]
async fn removals_rebuild_the_lexical_index() {
    let chunks = vec![
        (chunk("A", "kb-a", "alpha words"), [1.0, 0.0, 0.0, 0.0]),
        (chunk("B", "kb-b", "beta words"), [0.0, 1.0, 0.0, 0.0]),
        (chunk("C", "kb-b", "gamma words"), [0.0, 0.0, 1.0, 0.0]),
    ];
    let retriever = seeded(Arc::new(MemoryBackend::new()), &RetrievalConfig::default(), &chunks).await;
    assert_eq!(retriever.corpus_len().await, 3);

    let removed = retriever.remove_document("A").await;
    assert_eq!(removed.len(), 1);
    assert!(retriever.lexical().await.search("alpha", 5, None).is_empty());

    assert_eq!(retriever.remove_knowledge_base("kb-b").await.len(), 2);
    assert_eq!(retriever.corpus_len().await, 0);
    assert!(retriever.lexical().await.is_empty());
}

#[tokio::test]
async fn re_adding_a_chunk_replaces_its_content() {
    let retriever = seeded(Arc::new(MemoryBackend::new()), &RetrievalConfig::default(), &apple_banana()).await;
    retriever.add_chunks(&[chunk("A", "kb", "Cherry harvest")]).await;
    assert_eq!(retriever.corpus_len().await, 2);
    let lexical = retriever.lexical().await;
    assert!(lexical.search("apple", 5, None).is_empty());
    assert_eq!(lexical.search("cherry", 5, None)[0].chunk_id, "A:chunk_0");
}
