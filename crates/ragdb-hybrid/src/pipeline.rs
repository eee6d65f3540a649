//! Ingestion and search over one collection.
//!
//! Ingestion: chunk → embed → vector insert → lexical rebuild, with the
//! commit phase serialized. Search: embed query → hybrid retrieve (over-fetch
//! when reranking) → rerank → truncate. Neither path propagates provider or
//! backend failures; they surface as degradations on the returned value.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use ragdb_core::chunker::Chunker;
use ragdb_core::config::{ChunkStrategy, FusionMethod, RagConfig};
use ragdb_core::loader::{list_supported_files, TextFileLoader};
use ragdb_core::traits::DocumentLoader;
use ragdb_core::types::{Chunk, Document, KnowledgeBase, Meta, SearchResult, SourceInfo};
use ragdb_core::{CallContext, Degradation, Error, Outcome, Result};
use ragdb_embed::EmbeddingGateway;
use ragdb_vector::{VectorRecord, VectorStore};

use crate::catalog::{DocumentRecord, KnowledgeBaseCatalog};
use crate::rerank::Reranker;
use crate::retriever::HybridRetriever;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Error,
}

/// Per-document ingestion result. Never an `Err`: batch ingestion collects
/// one report per document and keeps going.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub doc_id: String,
    pub kb_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub chunks_created: usize,
    pub chunks_inserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
}

impl IngestReport {
    fn new(doc_id: &str, kb_id: &str) -> Self {
        Self {
            status: IngestStatus::Success,
            doc_id: doc_id.to_string(),
            kb_id: kb_id.to_string(),
            source: None,
            chunks_created: 0,
            chunks_inserted: 0,
            error: None,
            degraded: Vec::new(),
        }
    }

    fn fail(&mut self, error: &Error) {
        self.status = IngestStatus::Error;
        self.error = Some(error.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.status == IngestStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    /// `None` uses `pipeline.default_top_k`.
    pub top_k: Option<usize>,
    pub rerank: bool,
    /// `None` searches every active knowledge base.
    pub kb_ids: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), top_k: None, rerank: false, kb_ids: None }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn kb_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kb_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

/// Retrieved context rendered into a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryAnswer {
    pub question: String,
    pub context: String,
    pub formatted_prompt: String,
    pub results: Vec<SearchResult>,
    pub num_results: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStats {
    pub collection: String,
    pub backend: String,
    pub vector_count: usize,
    pub lexical_chunks: usize,
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub chunk_strategy: ChunkStrategy,
    pub embedder: String,
    pub dimension: usize,
    pub hybrid: bool,
    pub fusion: FusionMethod,
    pub reranker: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
}

pub struct RagPipeline {
    config: RagConfig,
    chunker: Chunker,
    gateway: Arc<EmbeddingGateway>,
    store: Arc<VectorStore>,
    retriever: HybridRetriever,
    reranker: Reranker,
    catalog: KnowledgeBaseCatalog,
    loader: Arc<dyn DocumentLoader>,
    collection_ready: AtomicBool,
    // serializes the commit phase: vector writes and lexical rebuilds
    ingest_lock: Mutex<()>,
}

/// Stable id for a file path.
pub fn doc_id_for_path(path: &Path) -> String {
    let hash = blake3::hash(path.to_string_lossy().as_bytes());
    format!("doc_{}", &hash.to_hex()[..16])
}

/// Fills `{context}` and `{question}` in one pass, so placeholders inside
/// the substituted text stay literal.
pub fn render_template(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

impl RagPipeline {
    /// Assembles a pipeline from already-built parts. The collection is
    /// created here; a failure is logged and retried on first ingestion.
    pub async fn new(
        config: RagConfig,
        gateway: Arc<EmbeddingGateway>,
        store: Arc<VectorStore>,
        reranker: Reranker,
    ) -> Result<Self> {
        config.validate()?;
        if gateway.dimension() != store.dimension() {
            return Err(Error::InvalidConfig(format!(
                "embedder dimension {} does not match vector store dimension {}",
                gateway.dimension(),
                store.dimension()
            )));
        }
        let chunker = Chunker::new(&config.chunking)?;
        let retriever = HybridRetriever::new(store.clone(), &config.retrieval);
        let pipeline = Self {
            config,
            chunker,
            gateway,
            store,
            retriever,
            reranker,
            catalog: KnowledgeBaseCatalog::new(),
            loader: Arc::new(TextFileLoader::new()),
            collection_ready: AtomicBool::new(false),
            ingest_lock: Mutex::new(()),
        };
        pipeline.ensure_collection(&CallContext::background()).await;
        Ok(pipeline)
    }

    /// Builds every component from configuration.
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let gateway = Arc::new(EmbeddingGateway::from_config(&config.embedding)?);
        let store = Arc::new(VectorStore::from_config(&config.vector_db, config.embedding.dimension).await?);
        let reranker = Reranker::from_config(&config.reranker)?;
        tracing::info!(
            embedder = gateway.provider_id(),
            backend = store.backend_name(),
            collection = store.collection(),
            reranker = reranker.name(),
            "pipeline configured"
        );
        Self::new(config, gateway, store, reranker).await
    }

    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn catalog(&self) -> &KnowledgeBaseCatalog {
        &self.catalog
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<EmbeddingGateway> {
        &self.gateway
    }

    pub fn loader(&self) -> &Arc<dyn DocumentLoader> {
        &self.loader
    }

    fn scoped(&self, ctx: &CallContext) -> CallContext {
        ctx.bounded(self.config.pipeline.operation_timeout())
    }

    async fn ensure_collection(&self, ctx: &CallContext) -> Vec<Degradation> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Vec::new();
        }
        let out = self.store.create_collection(ctx).await;
        if out.is_degraded() {
            tracing::warn!(collection = self.store.collection(), "could not initialize collection");
        } else {
            self.collection_ready.store(true, Ordering::Release);
            tracing::info!(collection = self.store.collection(), "collection initialized");
        }
        out.issues
    }

    // --- ingestion ---

    /// Chunks, embeds and stores one document.
    ///
    /// Re-ingesting a `doc_id` replaces its previous chunks. An interrupted
    /// ingestion deletes whatever it already wrote and reports `error`.
    pub async fn ingest_document(&self, ctx: &CallContext, doc: Document) -> IngestReport {
        let ctx = self.scoped(ctx);
        let mut report = IngestReport::new(&doc.doc_id, &doc.kb_id);
        match self.try_ingest(&ctx, &doc, &mut report).await {
            Ok(()) => tracing::info!(
                doc_id = %doc.doc_id,
                kb_id = %doc.kb_id,
                created = report.chunks_created,
                inserted = report.chunks_inserted,
                degraded = report.degraded.len(),
                "document ingested"
            ),
            Err(e) => {
                tracing::error!(doc_id = %doc.doc_id, kb_id = %doc.kb_id, error = %e, "ingestion failed");
                report.fail(&e);
            }
        }
        report
    }

    async fn try_ingest(&self, ctx: &CallContext, doc: &Document, report: &mut IngestReport) -> Result<()> {
        if doc.doc_id.trim().is_empty() {
            return Err(Error::InvalidInput("doc_id is empty".into()));
        }
        if doc.kb_id.trim().is_empty() {
            return Err(Error::InvalidInput("kb_id is empty".into()));
        }
        self.catalog.ensure(&doc.kb_id, self.gateway.provider_id()).await?;

        let chunks = self.chunker.chunk(doc);
        report.chunks_created = chunks.len();
        if chunks.is_empty() {
            tracing::debug!(doc_id = %doc.doc_id, "no chunks created from document");
            return Ok(());
        }
        ctx.check()?;

        let embedded = self.gateway.embed_chunks(ctx, chunks).await;
        if let Some(why) = embedded.was_interrupted() {
            report.degraded.extend(embedded.issues);
            return Err(why.into());
        }
        let embedded = embedded.drain_into(&mut report.degraded);
        let new_ids: Vec<String> = embedded.iter().map(|e| e.chunk.chunk_id.clone()).collect();

        let _commit = self.ingest_lock.lock().await;
        report.degraded.extend(self.ensure_collection(ctx).await);
        // Rows of a committed version that this insert overwrites in place.
        let previous = self.store.fetch_records(ctx, &new_ids).await;
        if let Some(why) = previous.was_interrupted() {
            report.degraded.extend(previous.issues);
            return Err(why.into());
        }
        if previous.is_degraded() {
            report.degraded.extend(previous.issues);
            return Err(Error::Operation("could not read the stored version of the document".into()));
        }
        let inserted = self.store.insert(ctx, &embedded, &doc.kb_id).await;
        if let Some(why) = inserted.was_interrupted() {
            report.degraded.extend(inserted.issues);
            self.roll_back(&new_ids, previous.value).await;
            return Err(why.into());
        }
        report.chunks_inserted = inserted.drain_into(&mut report.degraded);
        if report.chunks_inserted == 0 {
            return Err(Error::Operation(format!("vector store wrote 0 of {} chunks", report.chunks_created)));
        }

        let chunks: Vec<Chunk> = embedded.into_iter().map(|e| e.chunk).collect();
        self.retriever.add_chunks(&chunks).await;

        // Chunks of an earlier version of this document that the new one did not overwrite.
        let fresh: HashSet<&str> = new_ids.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .retriever
            .chunks_where(|c| c.doc_id == doc.doc_id && !fresh.contains(c.chunk_id.as_str()))
            .await
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        if !stale.is_empty() {
            let removed = self.store.delete(ctx, &stale).await.drain_into(&mut report.degraded);
            self.retriever.remove_chunks(&stale).await;
            tracing::debug!(doc_id = %doc.doc_id, stale = stale.len(), removed, "replaced previous version");
        }

        let source = if doc.source == SourceInfo::default() { SourceInfo::from_meta(&doc.metadata) } else { doc.source.clone() };
        self.catalog.record_document(&doc.doc_id, &doc.kb_id, source, chunks.len()).await;
        Ok(())
    }

    /// Undoes an interrupted insert: rows it created are deleted, rows it
    /// overwrote are written back.
    async fn roll_back(&self, written: &[String], previous: Vec<VectorRecord>) {
        // The caller's context is already spent; cleanup runs on its own.
        let cleanup = CallContext::with_timeout(Duration::from_secs(30));
        let created: Vec<String> = {
            let kept: HashSet<&str> = previous.iter().map(|r| r.chunk_id.as_str()).collect();
            written.iter().filter(|id| !kept.contains(id.as_str())).cloned().collect()
        };
        let removed = self.store.delete(&cleanup, &created).await;
        let restored = self.store.restore(&cleanup, previous).await;
        if removed.is_degraded() || restored.is_degraded() {
            tracing::error!(
                created = created.len(),
                issues = ?removed.issues.iter().chain(&restored.issues).collect::<Vec<_>>(),
                "rollback of interrupted ingestion failed"
            );
        } else {
            tracing::warn!(removed = removed.value, restored = restored.value, "rolled back interrupted ingestion");
        }
    }

    pub async fn ingest_text(
        &self,
        ctx: &CallContext,
        text: &str,
        doc_id: &str,
        kb_id: &str,
        metadata: Meta,
    ) -> IngestReport {
        self.ingest_document(ctx, Document::new(doc_id, kb_id, text).with_metadata(metadata)).await
    }

    /// Loads `path` through the configured loader and ingests it. The
    /// document id is derived from the path.
    pub async fn ingest_file(&self, ctx: &CallContext, path: &Path, kb_id: &str, metadata: Meta) -> IngestReport {
        let doc_id = doc_id_for_path(path);
        let loader = self.loader.clone();
        let owned: PathBuf = path.to_path_buf();
        let loaded = match tokio::task::spawn_blocking(move || loader.load(&owned)).await {
            Ok(result) => result,
            Err(join) => Err(anyhow::anyhow!("loader task failed: {join}")),
        };
        let mut report = match loaded {
            Ok(loaded) => {
                let mut meta = loaded.metadata;
                meta.extend(metadata);
                let source = SourceInfo::from_meta(&meta);
                let doc = Document::new(doc_id, kb_id, loaded.content).with_source(source).with_metadata(meta);
                self.ingest_document(ctx, doc).await
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load document");
                let mut report = IngestReport::new(&doc_id, kb_id);
                report.fail(&Error::InvalidInput(format!("{e:#}")));
                report
            }
        };
        report.source = Some(path.display().to_string());
        report
    }

    /// Ingests each document in turn. A failed document does not stop the batch.
    pub async fn ingest_documents(&self, ctx: &CallContext, docs: Vec<Document>) -> Vec<IngestReport> {
        let mut reports = Vec::with_capacity(docs.len());
        for doc in docs {
            reports.push(self.ingest_document(ctx, doc).await);
        }
        log_batch(&reports);
        reports
    }

    pub async fn ingest_files(&self, ctx: &CallContext, paths: &[PathBuf], kb_id: &str, metadata: &Meta) -> Vec<IngestReport> {
        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            reports.push(self.ingest_file(ctx, path, kb_id, metadata.clone()).await);
        }
        log_batch(&reports);
        reports
    }

    /// Ingests every file under `dir` the loader supports.
    pub async fn ingest_directory(&self, ctx: &CallContext, dir: &Path, kb_id: &str, metadata: &Meta) -> Result<Vec<IngestReport>> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("directory {}", dir.display())));
        }
        let files = list_supported_files(dir, self.loader.as_ref());
        tracing::info!(dir = %dir.display(), files = files.len(), "found files");
        Ok(self.ingest_files(ctx, &files, kb_id, metadata).await)
    }

    // --- search ---

    /// Knowledge bases a search may read. Deleted ones are never searched;
    /// ids the catalog has not seen pass through.
    async fn search_scope(&self, requested: Option<Vec<String>>) -> Option<Vec<String>> {
        if !self.catalog.has_deleted().await {
            return requested;
        }
        match requested {
            Some(mut ids) => {
                let deleted: HashSet<String> = self.catalog.deleted_ids().await.into_iter().collect();
                ids.retain(|id| !deleted.contains(id));
                Some(ids)
            }
            None => Some(self.catalog.active_ids().await),
        }
    }

    /// Hybrid search with optional reranking.
    ///
    /// Asks the retriever for `top_k × rerank_overfetch` candidates when
    /// reranking. Failures degrade to fewer (or no) results, never an error.
    pub async fn search(&self, ctx: &CallContext, request: SearchRequest) -> Outcome<Vec<SearchResult>> {
        let ctx = self.scoped(ctx);
        let top_k = request.top_k.unwrap_or(self.config.pipeline.default_top_k);
        if top_k == 0 || request.query.trim().is_empty() {
            return Outcome::ok(Vec::new());
        }
        let mut issues = Vec::new();
        let kb_ids = self.search_scope(request.kb_ids).await;

        let query_vector = self.gateway.embed_one(&ctx, &request.query).await.drain_into(&mut issues);
        let fetch = if request.rerank { top_k.saturating_mul(self.config.pipeline.rerank_overfetch.max(1)) } else { top_k };
        let mut results =
            self.retriever.retrieve(&ctx, &request.query, &query_vector, fetch, kb_ids.as_deref()).await.drain_into(&mut issues);
        if request.rerank {
            results = self.reranker.rerank(&ctx, &request.query, results, top_k).await.drain_into(&mut issues);
        }
        results.truncate(top_k);
        tracing::debug!(results = results.len(), degraded = issues.len(), rerank = request.rerank, "search complete");
        Outcome { value: results, issues }
    }

    /// Retrieves context for `question` and renders it into `template`
    /// (`pipeline.context_template` when `None`).
    pub async fn query(&self, ctx: &CallContext, question: &str, top_k: Option<usize>, template: Option<&str>) -> QueryAnswer {
        let mut request = SearchRequest::new(question);
        request.top_k = top_k;
        let (results, degraded) = self.search(ctx, request).await.into_parts();
        let context = results.iter().filter(|r| !r.content.is_empty()).map(|r| r.content.as_str()).collect::<Vec<_>>().join(CONTEXT_SEPARATOR);
        let template = template.unwrap_or(self.config.pipeline.context_template.as_str());
        QueryAnswer {
            question: question.to_string(),
            formatted_prompt: render_template(template, &context, question),
            context,
            num_results: results.len(),
            results,
            degraded,
        }
    }

    // --- deletion ---

    /// Deletes chunks by id from both indexes. Returns the vector-side count.
    pub async fn delete_documents(&self, ctx: &CallContext, chunk_ids: &[String]) -> Outcome<usize> {
        let ctx = self.scoped(ctx);
        let _commit = self.ingest_lock.lock().await;
        let out = self.store.delete(&ctx, chunk_ids).await;
        let removed = self.retriever.remove_chunks(chunk_ids).await;
        self.catalog.forget_chunks(&removed).await;
        out
    }

    /// Deletes every chunk of `doc_id`.
    pub async fn delete_document(&self, ctx: &CallContext, doc_id: &str) -> Outcome<usize> {
        let ctx = self.scoped(ctx);
        let _commit = self.ingest_lock.lock().await;
        let out = self.store.delete_by_doc_id(&ctx, doc_id).await;
        self.retriever.remove_document(doc_id).await;
        self.catalog.remove_document(doc_id).await;
        out
    }

    pub async fn drop_collection(&self, ctx: &CallContext) -> Outcome<()> {
        let ctx = self.scoped(ctx);
        let _commit = self.ingest_lock.lock().await;
        let out = self.store.drop_collection(&ctx).await;
        self.collection_ready.store(false, Ordering::Release);
        self.retriever.reset().await;
        self.catalog.clear_documents().await;
        tracing::info!(collection = self.store.collection(), degraded = out.is_degraded(), "collection dropped");
        out
    }

    // --- knowledge bases ---

    pub async fn create_knowledge_base(&self, name: &str) -> Result<KnowledgeBase> {
        self.catalog.create(name, self.gateway.provider_id()).await
    }

    pub async fn list_knowledge_bases(&self, include_deleted: bool) -> Vec<KnowledgeBase> {
        self.catalog.list(include_deleted).await
    }

    pub async fn knowledge_base_documents(&self, kb_id: &str) -> Vec<DocumentRecord> {
        self.catalog.documents(kb_id).await
    }

    /// Marks `kb_id` deleted and removes its chunks from both indexes.
    pub async fn delete_knowledge_base(&self, ctx: &CallContext, kb_id: &str) -> Result<Outcome<usize>> {
        let ctx = self.scoped(ctx);
        let _commit = self.ingest_lock.lock().await;
        self.catalog.mark_deleted(kb_id).await?;
        let out = self.store.delete_by_kb_id(&ctx, kb_id).await;
        let removed = self.retriever.remove_knowledge_base(kb_id).await;
        tracing::info!(kb_id, vectors = out.value, lexical = removed.len(), "knowledge base deleted");
        Ok(out)
    }

    // --- maintenance ---

    /// Rebuilds the lexical corpus and the catalog counts from the vector
    /// store. A failed scan leaves the current index untouched.
    pub async fn reindex_from_store(&self, ctx: &CallContext) -> Outcome<usize> {
        let ctx = self.scoped(ctx);
        let _commit = self.ingest_lock.lock().await;
        let scanned = self.store.fetch_all_chunks(&ctx, None).await;
        if scanned.is_degraded() {
            tracing::warn!(issues = ?scanned.issues, "store scan failed, lexical index left as is");
            return Outcome { value: self.retriever.corpus_len().await, issues: scanned.issues };
        }
        let chunks = scanned.value;
        self.catalog.rebuild_from_chunks(&chunks, self.gateway.provider_id()).await;
        let active: HashSet<String> = self.catalog.active_ids().await.into_iter().collect();
        let chunks: Vec<Chunk> = chunks.into_iter().filter(|c| active.contains(&c.kb_id)).collect();
        let count = chunks.len();
        self.retriever.index_documents(chunks).await;
        Outcome::ok(count)
    }

    pub async fn get_stats(&self, ctx: &CallContext) -> PipelineStats {
        let ctx = self.scoped(ctx);
        let (vector_count, degraded) = self.store.count(&ctx, None).await.into_parts();
        PipelineStats {
            collection: self.store.collection().to_string(),
            backend: self.store.backend_name().to_string(),
            vector_count,
            lexical_chunks: self.retriever.corpus_len().await,
            knowledge_bases: self.catalog.list(true).await,
            chunk_strategy: self.chunker.strategy(),
            embedder: self.gateway.provider_id().to_string(),
            dimension: self.gateway.dimension(),
            hybrid: self.config.retrieval.hybrid,
            fusion: self.config.retrieval.fusion,
            reranker: self.reranker.name().to_string(),
            degraded,
        }
    }
}

fn log_batch(reports: &[IngestReport]) {
    let ok = reports.iter().filter(|r| r.is_success()).count();
    let chunks: usize = reports.iter().map(|r| r.chunks_created).sum();
    tracing::info!(succeeded = ok, total = reports.len(), chunks, "batch ingestion finished");
}
