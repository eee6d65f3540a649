//! Core building blocks of the retrieval engine.
//!
//! Domain types, the degraded-result type, collaborator traits, the per-call
//! context, configuration loading, the chunker and the plain-text loader.
//! Every other crate in the workspace depends on this one.

pub mod chunker;
pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod outcome;
pub mod traits;
pub mod types;

pub use context::{CallContext, CancelHandle, Interrupted};
pub use error::{Error, Result};
pub use outcome::{Degradation, Outcome};
