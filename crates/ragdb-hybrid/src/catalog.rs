use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use ragdb_core::types::{Chunk, KbStatus, KnowledgeBase, SourceInfo};
use ragdb_core::{Error, Result};

/// What the pipeline remembers about one ingested document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub kb_id: String,
    pub source: SourceInfo,
    pub chunk_count: usize,
    pub created_at: String,
}

#[derive(Default)]
struct State {
    // creation order
    kbs: Vec<KnowledgeBase>,
    documents: HashMap<String, DocumentRecord>,
}

impl State {
    fn kb_mut(&mut self, kb_id: &str) -> Option<&mut KnowledgeBase> {
        self.kbs.iter_mut().find(|kb| kb.kb_id == kb_id)
    }

    fn name_taken(&self, name: &str) -> bool {
        self.kbs.iter().any(|kb| kb.status == KbStatus::Active && kb.name == name)
    }

    /// `base`, or `base-2`, `base-3`, ... when an active knowledge base holds it.
    fn free_name(&self, base: &str) -> String {
        if !self.name_taken(base) {
            return base.to_string();
        }
        (2..).map(|n| format!("{base}-{n}")).find(|name| !self.name_taken(name)).unwrap_or_else(|| base.to_string())
    }

    fn forget_document(&mut self, doc_id: &str) -> Option<DocumentRecord> {
        let record = self.documents.remove(doc_id)?;
        if let Some(kb) = self.kb_mut(&record.kb_id) {
            kb.doc_count = kb.doc_count.saturating_sub(1);
            kb.chunk_count = kb.chunk_count.saturating_sub(record.chunk_count);
        }
        Some(record)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_kb(kb_id: String, name: String, embedding_model: &str) -> KnowledgeBase {
    KnowledgeBase {
        kb_id,
        name,
        embedding_model: embedding_model.to_string(),
        doc_count: 0,
        chunk_count: 0,
        status: KbStatus::Active,
        created_at: Some(now()),
    }
}

/// Knowledge bases and per-document bookkeeping.
///
/// Deleted knowledge bases stay listed with status `deleted`; their id can
/// not be reused for ingestion.
#[derive(Default)]
pub struct KnowledgeBaseCatalog {
    state: RwLock<State>,
}

impl KnowledgeBaseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a knowledge base. Names are unique among active ones.
    pub async fn create(&self, name: &str, embedding_model: &str) -> Result<KnowledgeBase> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("knowledge base name is empty".into()));
        }
        let mut state = self.state.write().await;
        if state.name_taken(name) {
            return Err(Error::InvalidInput(format!("knowledge base named {name:?} already exists")));
        }
        let seed = format!("{name}\u{0}{}\u{0}{}", now(), state.kbs.len());
        let kb_id = format!("kb_{}", &blake3::hash(seed.as_bytes()).to_hex()[..12]);
        let kb = new_kb(kb_id, name.to_string(), embedding_model);
        tracing::info!(kb_id = %kb.kb_id, name, "knowledge base created");
        state.kbs.push(kb.clone());
        Ok(kb)
    }

    /// Returns the active knowledge base `kb_id`, registering it under its
    /// own id as name when unknown. An unknown id that equals the name of an
    /// active knowledge base is rejected.
    pub async fn ensure(&self, kb_id: &str, embedding_model: &str) -> Result<KnowledgeBase> {
        let mut state = self.state.write().await;
        if let Some(kb) = state.kbs.iter().find(|kb| kb.kb_id == kb_id) {
            return match kb.status {
                KbStatus::Active => Ok(kb.clone()),
                KbStatus::Deleted => Err(Error::InvalidInput(format!("knowledge base {kb_id} is deleted"))),
            };
        }
        if let Some(owner) = state.kbs.iter().find(|kb| kb.status == KbStatus::Active && kb.name == kb_id) {
            return Err(Error::InvalidInput(format!(
                "{kb_id:?} is the name of knowledge base {}; ingest by its id",
                owner.kb_id
            )));
        }
        let kb = new_kb(kb_id.to_string(), kb_id.to_string(), embedding_model);
        tracing::debug!(kb_id, "knowledge base registered implicitly");
        state.kbs.push(kb.clone());
        Ok(kb)
    }

    pub async fn get(&self, kb_id: &str) -> Option<KnowledgeBase> {
        self.state.read().await.kbs.iter().find(|kb| kb.kb_id == kb_id).cloned()
    }

    pub async fn list(&self, include_deleted: bool) -> Vec<KnowledgeBase> {
        self.state
            .read()
            .await
            .kbs
            .iter()
            .filter(|kb| include_deleted || kb.status == KbStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn active_ids(&self) -> Vec<String> {
        self.list(false).await.into_iter().map(|kb| kb.kb_id).collect()
    }

    pub async fn deleted_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.kbs.iter().filter(|kb| kb.status == KbStatus::Deleted).map(|kb| kb.kb_id.clone()).collect()
    }

    pub async fn has_deleted(&self) -> bool {
        self.state.read().await.kbs.iter().any(|kb| kb.status == KbStatus::Deleted)
    }

    /// Marks `kb_id` deleted and drops its document records.
    pub async fn mark_deleted(&self, kb_id: &str) -> Result<KnowledgeBase> {
        let mut state = self.state.write().await;
        let kb = state.kb_mut(kb_id).ok_or_else(|| Error::NotFound(format!("knowledge base {kb_id}")))?;
        if kb.status == KbStatus::Deleted {
            return Err(Error::NotFound(format!("knowledge base {kb_id} is already deleted")));
        }
        kb.status = KbStatus::Deleted;
        kb.doc_count = 0;
        kb.chunk_count = 0;
        let kb = kb.clone();
        state.documents.retain(|_, d| d.kb_id != kb_id);
        Ok(kb)
    }

    /// Records a successful ingestion, replacing any previous record for the document.
    pub async fn record_document(&self, doc_id: &str, kb_id: &str, source: SourceInfo, chunk_count: usize) {
        let mut state = self.state.write().await;
        state.forget_document(doc_id);
        if let Some(kb) = state.kb_mut(kb_id) {
            kb.doc_count += 1;
            kb.chunk_count += chunk_count;
        }
        let record = DocumentRecord { doc_id: doc_id.to_string(), kb_id: kb_id.to_string(), source, chunk_count, created_at: now() };
        state.documents.insert(doc_id.to_string(), record);
    }

    pub async fn document(&self, doc_id: &str) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(doc_id).cloned()
    }

    /// Documents of `kb_id`, ordered by id.
    pub async fn documents(&self, kb_id: &str) -> Vec<DocumentRecord> {
        let state = self.state.read().await;
        let mut docs: Vec<DocumentRecord> = state.documents.values().filter(|d| d.kb_id == kb_id).cloned().collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        docs
    }

    pub async fn remove_document(&self, doc_id: &str) -> Option<DocumentRecord> {
        self.state.write().await.forget_document(doc_id)
    }

    /// Adjusts counts after individual chunks were deleted.
    pub async fn forget_chunks(&self, removed: &[Chunk]) {
        let mut state = self.state.write().await;
        for chunk in removed {
            if let Some(kb) = state.kb_mut(&chunk.kb_id) {
                kb.chunk_count = kb.chunk_count.saturating_sub(1);
            }
            let emptied = match state.documents.get_mut(&chunk.doc_id) {
                Some(doc) => {
                    doc.chunk_count = doc.chunk_count.saturating_sub(1);
                    doc.chunk_count == 0
                }
                None => false,
            };
            if emptied {
                state.documents.remove(&chunk.doc_id);
                if let Some(kb) = state.kb_mut(&chunk.kb_id) {
                    kb.doc_count = kb.doc_count.saturating_sub(1);
                }
            }
        }
    }

    /// Forgets every document and zeroes the counts. Knowledge bases stay.
    pub async fn clear_documents(&self) {
        let mut state = self.state.write().await;
        state.documents.clear();
        for kb in &mut state.kbs {
            kb.doc_count = 0;
            kb.chunk_count = 0;
        }
    }

    /// Recomputes documents and counts from stored chunks.
    ///
    /// Knowledge bases that only exist in storage are registered; chunks of
    /// deleted knowledge bases are ignored.
    pub async fn rebuild_from_chunks(&self, chunks: &[Chunk], embedding_model: &str) {
        let mut state = self.state.write().await;
        state.documents.clear();
        for kb in &mut state.kbs {
            kb.doc_count = 0;
            kb.chunk_count = 0;
        }
        for chunk in chunks {
            if state.kb_mut(&chunk.kb_id).is_none() {
                let name = state.free_name(&chunk.kb_id);
                state.kbs.push(new_kb(chunk.kb_id.clone(), name, embedding_model));
            }
            let State { kbs, documents } = &mut *state;
            let Some(kb) = kbs.iter_mut().find(|kb| kb.kb_id == chunk.kb_id) else { continue };
            if kb.status == KbStatus::Deleted {
                continue;
            }
            kb.chunk_count += 1;
            let doc = documents.entry(chunk.doc_id.clone()).or_insert_with(|| {
                kb.doc_count += 1;
                DocumentRecord {
                    doc_id: chunk.doc_id.clone(),
                    kb_id: chunk.kb_id.clone(),
                    source: SourceInfo::from_meta(&chunk.metadata),
                    chunk_count: 0,
                    created_at: now(),
                }
            });
            doc.chunk_count += 1;
        }
    }
}
