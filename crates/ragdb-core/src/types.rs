//! Domain types shared by the chunker, the lexical and vector engines and the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ChunkId = String;
pub type KbId = String;
pub type DocId = String;
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Role of a chunk inside the chunk tree produced for one document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Parent,
    Child,
    Simple,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Parent => "parent",
            ChunkType::Child => "child",
            ChunkType::Simple => "simple",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic indexed unit.
///
/// - `chunk_id`: unique within a collection (derived from `doc_id`)
/// - `kb_id`/`doc_id`: owning knowledge base and document
/// - `parent_id`: set only on child chunks, names a parent from the same pass
/// - `parent_index`/`child_index`/`index`: position inside the chunk tree
/// - `metadata`: source metadata copied from the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub kb_id: KbId,
    pub doc_id: DocId,
    pub parent_id: Option<ChunkId>,
    pub content: String,
    pub chunk_type: ChunkType,
    pub parent_index: Option<usize>,
    pub child_index: Option<usize>,
    pub index: Option<usize>,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    /// Metadata surfaced on search results: the source metadata plus the
    /// identity and position fields of the chunk.
    pub fn result_metadata(&self) -> Meta {
        let mut meta = self.metadata.clone();
        meta.insert("kb_id".into(), self.kb_id.clone().into());
        meta.insert("doc_id".into(), self.doc_id.clone().into());
        meta.insert("chunk_type".into(), self.chunk_type.as_str().into());
        if let Some(parent_id) = &self.parent_id {
            meta.insert("parent_id".into(), parent_id.clone().into());
        }
        if let Some(i) = self.parent_index {
            meta.insert("parent_index".into(), i.into());
        }
        if let Some(i) = self.child_index {
            meta.insert("child_index".into(), i.into());
        }
        if let Some(i) = self.index {
            meta.insert("index".into(), i.into());
        }
        meta
    }

    /// Rebuilds a chunk from a stored content + result metadata pair.
    pub fn from_stored(chunk_id: ChunkId, content: String, stored: &Meta) -> Self {
        let text = |key: &str| stored.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let pos = |key: &str| stored.get(key).and_then(serde_json::Value::as_u64).map(|v| v as usize);
        let chunk_type = match stored.get("chunk_type").and_then(|v| v.as_str()) {
            Some("parent") => ChunkType::Parent,
            Some("child") => ChunkType::Child,
            _ => ChunkType::Simple,
        };
        let reserved = ["kb_id", "doc_id", "chunk_type", "parent_id", "parent_index", "child_index", "index"];
        let metadata = stored
            .iter()
            .filter(|(k, _)| !reserved.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            chunk_id,
            kb_id: text("kb_id").unwrap_or_default(),
            doc_id: text("doc_id").unwrap_or_default(),
            parent_id: text("parent_id"),
            content,
            chunk_type,
            parent_index: pos("parent_index"),
            child_index: pos("child_index"),
            index: pos("index"),
            metadata,
        }
    }
}

/// A chunk plus its embedding. `vector.len()` equals the configured dimension;
/// a failed embedding is the all-zero vector, never a missing one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn is_zero(&self) -> bool {
        is_zero_vector(&self.vector)
    }
}

pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Where a source document came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInfo {
    pub filename: Option<String>,
    pub format: Option<String>,
    pub size: Option<u64>,
}

impl SourceInfo {
    pub fn to_meta(&self) -> Meta {
        let mut meta = Meta::new();
        if let Some(v) = &self.filename {
            meta.insert("filename".into(), v.clone().into());
        }
        if let Some(v) = &self.format {
            meta.insert("format".into(), v.clone().into());
        }
        if let Some(v) = self.size {
            meta.insert("size".into(), v.into());
        }
        meta
    }

    pub fn from_meta(meta: &Meta) -> Self {
        Self {
            filename: meta.get("filename").and_then(|v| v.as_str()).map(str::to_string),
            format: meta.get("format").and_then(|v| v.as_str()).map(str::to_string),
            size: meta.get("size").and_then(serde_json::Value::as_u64),
        }
    }
}

/// An ingested unit of text owned by one knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub doc_id: DocId,
    pub kb_id: KbId,
    pub text: String,
    #[serde(default)]
    pub source: SourceInfo,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn new(doc_id: impl Into<DocId>, kb_id: impl Into<KbId>, text: impl Into<String>) -> Self {
        Self { doc_id: doc_id.into(), kb_id: kb_id.into(), text: text.into(), source: SourceInfo::default(), metadata: Meta::new() }
    }

    pub fn with_metadata(mut self, metadata: Meta) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KbStatus {
    Active,
    Deleted,
}

/// A named partition of documents and chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    pub kb_id: KbId,
    pub name: String,
    pub embedding_model: String,
    pub doc_count: usize,
    pub chunk_count: usize,
    pub status: KbStatus,
    pub created_at: Option<String>,
}

/// Indicates which stage produced a result's score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Lexical,
    Fused,
    Reranked,
}

/// The surface returned by every retrieval stage.
///
/// `score` is stage-specific (similarity, BM25, RRF or rerank relevance) and
/// is not comparable across stages. Higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub content: String,
    pub score: f32,
    pub metadata: Option<Meta>,
    pub source: SourceKind,
}

impl SearchResult {
    pub fn kb_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("kb_id")?.as_str()
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("doc_id")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_metadata_round_trips_identity_fields() {
        let mut metadata = Meta::new();
        metadata.insert("filename".into(), "a.txt".into());
        let chunk = Chunk {
            chunk_id: "d1:child_0_2".into(),
            kb_id: "kb".into(),
            doc_id: "d1".into(),
            parent_id: Some("d1:parent_0".into()),
            content: "body".into(),
            chunk_type: ChunkType::Child,
            parent_index: Some(0),
            child_index: Some(2),
            index: None,
            metadata,
        };
        let rebuilt = Chunk::from_stored(chunk.chunk_id.clone(), chunk.content.clone(), &chunk.result_metadata());
        assert_eq!(rebuilt, chunk);
    }
}
