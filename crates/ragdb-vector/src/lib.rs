//! Multi-tenant vector storage.
//!
//! [`VectorStore`] is what the engine talks to. It scopes every operation by
//! `kb_id`, enforces the collection dimension and turns backend failures into
//! degraded outcomes. Backends only need exact-match filtering on a field.

pub mod backend;
pub mod store;

pub use backend::{build_backend, FilterField, MatchFilter, ScoredRecord, VectorBackend, VectorRecord};
pub use store::VectorStore;
