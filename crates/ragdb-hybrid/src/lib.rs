//! Hybrid retrieval and the ingestion/search pipeline.
//!
//! [`HybridRetriever`] fuses the vector store and the lexical index with
//! Reciprocal Rank Fusion, [`Reranker`] optionally reorders the fused list,
//! and [`RagPipeline`] composes chunking, embedding, storage and retrieval
//! behind one handle.

pub mod catalog;
pub mod fusion;
pub mod pipeline;
pub mod rerank;
pub mod retriever;

pub use catalog::{DocumentRecord, KnowledgeBaseCatalog};
pub use fusion::{reciprocal_rank_fusion, RRF_K};
pub use pipeline::{IngestReport, IngestStatus, PipelineStats, QueryAnswer, RagPipeline, SearchRequest};
pub use rerank::{HttpRerankProvider, Reranker};
pub use retriever::HybridRetriever;
