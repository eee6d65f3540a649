pub mod analyzer;
pub mod lexical;

pub use analyzer::Analyzer;
pub use lexical::{Bm25Params, LexicalIndex};
