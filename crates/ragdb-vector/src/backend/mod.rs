use async_trait::async_trait;
use std::sync::Arc;

use ragdb_core::config::{Metric, VectorBackendKind, VectorDbConfig};
use ragdb_core::types::Meta;
use ragdb_core::{Error, Result};

#[cfg(feature = "lancedb")]
pub mod lance;
pub mod memory;
#[cfg(feature = "lancedb")]
pub mod schema;

pub use memory::MemoryBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    ChunkId,
    KbId,
    DocId,
}

impl FilterField {
    pub fn column(self) -> &'static str {
        match self {
            FilterField::ChunkId => "chunk_id",
            FilterField::KbId => "kb_id",
            FilterField::DocId => "doc_id",
        }
    }
}

/// Exact match of one field against a set of values. The only predicate a
/// backend has to understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFilter {
    pub field: FilterField,
    pub any_of: Vec<String>,
}

impl MatchFilter {
    pub fn new(field: FilterField, any_of: Vec<String>) -> Self {
        Self { field, any_of }
    }

    pub fn kb_ids(ids: &[String]) -> Self {
        Self::new(FilterField::KbId, ids.to_vec())
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        let value = match self.field {
            FilterField::ChunkId => &record.chunk_id,
            FilterField::KbId => &record.kb_id,
            FilterField::DocId => &record.doc_id,
        };
        self.any_of.iter().any(|v| v == value)
    }
}

/// One stored row: identity, payload and vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub kb_id: String,
    pub doc_id: String,
    pub content: String,
    pub metadata: Meta,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    /// Similarity, higher is better.
    pub score: f32,
}

/// Storage engine behind a [`crate::VectorStore`].
///
/// Inserts upsert by `chunk_id`. Errors are plain `anyhow` errors; the store
/// decides how they surface.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool>;
    async fn create_collection(&self, collection: &str, dimension: usize, metric: Metric) -> anyhow::Result<()>;
    async fn drop_collection(&self, collection: &str) -> anyhow::Result<()>;
    async fn insert(&self, collection: &str, records: Vec<VectorRecord>) -> anyhow::Result<usize>;
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MatchFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>>;
    /// Removes matching rows and returns how many were removed.
    async fn delete(&self, collection: &str, filter: &MatchFilter) -> anyhow::Result<usize>;
    async fn count(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<usize>;
    /// Every matching row in insertion order.
    async fn scan(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<Vec<VectorRecord>>;
}

/// Builds the configured backend. A backend compiled out of this build is a
/// configuration error.
pub async fn build_backend(config: &VectorDbConfig) -> Result<Arc<dyn VectorBackend>> {
    match config.backend {
        VectorBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "lancedb")]
        VectorBackendKind::Lancedb => {
            let uri = ragdb_core::config::expand_path(&config.uri);
            let backend = lance::LanceBackend::connect(&uri.to_string_lossy())
                .await
                .map_err(|e| Error::InvalidConfig(format!("cannot open lancedb at {}: {e}", uri.display())))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "lancedb"))]
        VectorBackendKind::Lancedb => {
            Err(Error::Unsupported("vector backend 'lancedb' requires the `lancedb` feature".into()))
        }
    }
}
