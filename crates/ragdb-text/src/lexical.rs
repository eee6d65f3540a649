//! In-memory BM25 inverted index over chunk text.
//!
//! The index is derived state: it is rebuilt wholesale from a corpus of
//! chunks and never updated in place. Callers that need concurrent reads
//! build a fresh index and swap it in.

use std::collections::{BTreeMap, HashMap};

use ragdb_core::types::{Chunk, ChunkId, Meta, SearchResult, SourceKind};

use crate::analyzer::Analyzer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

struct IndexedDoc {
    chunk_id: ChunkId,
    kb_id: String,
    content: String,
    metadata: Meta,
    length: usize,
}

pub struct LexicalIndex {
    params: Bm25Params,
    analyzer: Analyzer,
    docs: Vec<IndexedDoc>,
    ordinals: HashMap<ChunkId, usize>,
    // term -> (doc ordinal, term frequency), ordinals ascending
    postings: HashMap<String, Vec<(usize, u32)>>,
    avg_doc_length: f32,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl LexicalIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            analyzer: Analyzer::new(),
            docs: Vec::new(),
            ordinals: HashMap::new(),
            postings: HashMap::new(),
            avg_doc_length: 0.0,
        }
    }

    /// Builds an index over `chunks` in one step.
    pub fn build(params: Bm25Params, chunks: &[Chunk]) -> Self {
        let mut index = Self::new(params);
        index.index_documents(chunks);
        index
    }

    /// Replaces all prior state with an index over `chunks`.
    ///
    /// A chunk id seen twice keeps its first position and its latest content.
    pub fn index_documents(&mut self, chunks: &[Chunk]) {
        self.reset();
        let mut total_length = 0usize;
        for chunk in chunks {
            let terms = self.analyzer.tokenize(&chunk.content);
            let doc = IndexedDoc {
                chunk_id: chunk.chunk_id.clone(),
                kb_id: chunk.kb_id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.result_metadata(),
                length: terms.len(),
            };
            let ordinal = match self.ordinals.get(&chunk.chunk_id) {
                Some(&existing) => {
                    total_length -= self.docs[existing].length;
                    self.remove_postings(existing);
                    self.docs[existing] = doc;
                    existing
                }
                None => {
                    self.docs.push(doc);
                    self.ordinals.insert(chunk.chunk_id.clone(), self.docs.len() - 1);
                    self.docs.len() - 1
                }
            };
            total_length += terms.len();

            let mut freqs: BTreeMap<String, u32> = BTreeMap::new();
            for term in terms {
                *freqs.entry(term).or_insert(0) += 1;
            }
            for (term, tf) in freqs {
                let list = self.postings.entry(term).or_default();
                let at = list.partition_point(|(o, _)| *o < ordinal);
                list.insert(at, (ordinal, tf));
            }
        }
        self.avg_doc_length = if self.docs.is_empty() { 0.0 } else { total_length as f32 / self.docs.len() as f32 };
        tracing::debug!(docs = self.docs.len(), terms = self.postings.len(), "lexical index rebuilt");
    }

    fn remove_postings(&mut self, ordinal: usize) {
        for list in self.postings.values_mut() {
            list.retain(|(o, _)| *o != ordinal);
        }
        self.postings.retain(|_, list| !list.is_empty());
    }

    pub fn reset(&mut self) {
        self.docs.clear();
        self.ordinals.clear();
        self.postings.clear();
        self.avg_doc_length = 0.0;
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn avg_doc_length(&self) -> f32 {
        self.avg_doc_length
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    pub fn doc_length(&self, chunk_id: &str) -> Option<usize> {
        self.ordinals.get(chunk_id).map(|&o| self.docs[o].length)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ordinals.contains_key(chunk_id)
    }

    pub fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = self.doc_freq(term) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Scores every chunk sharing a term with `query`, best first.
    ///
    /// Ties keep index order. `kb_ids` restricts candidates to those
    /// knowledge bases; `None` searches the whole index.
    pub fn search(&self, query: &str, top_k: usize, kb_ids: Option<&[String]>) -> Vec<SearchResult> {
        if top_k == 0 || self.docs.is_empty() {
            return Vec::new();
        }
        let Bm25Params { k1, b } = self.params;
        let avgdl = if self.avg_doc_length > 0.0 { self.avg_doc_length } else { 1.0 };
        let allowed = |ordinal: usize| kb_ids.map_or(true, |ids| ids.iter().any(|id| *id == self.docs[ordinal].kb_id));

        let mut scores: BTreeMap<usize, f32> = BTreeMap::new();
        for term in self.analyzer.tokenize(query) {
            let Some(list) = self.postings.get(&term) else { continue };
            let idf = self.idf(&term);
            for &(ordinal, tf) in list {
                if !allowed(ordinal) {
                    continue;
                }
                let tf = tf as f32;
                let dl = self.docs[ordinal].length as f32;
                let norm = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(ordinal).or_insert(0.0) += idf * (tf * (k1 + 1.0)) / norm;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_k);
        ranked
            .into_iter()
            .map(|(ordinal, score)| {
                let doc = &self.docs[ordinal];
                SearchResult {
                    chunk_id: doc.chunk_id.clone(),
                    content: doc.content.clone(),
                    score,
                    metadata: Some(doc.metadata.clone()),
                    source: SourceKind::Lexical,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdb_core::types::ChunkType;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            kb_id: "kb".into(),
            doc_id: "d".into(),
            parent_id: None,
            content: content.into(),
            chunk_type: ChunkType::Simple,
            parent_index: None,
            child_index: None,
            index: None,
            metadata: Meta::new(),
        }
    }

    #[test]
    fn duplicate_ids_keep_latest_content_once() {
        let index = LexicalIndex::build(Bm25Params::default(), &[chunk("x", "alpha"), chunk("y", "beta"), chunk("x", "gamma")]);
        assert_eq!(index.doc_count(), 2);
        assert_eq!(index.doc_freq("alpha"), 0);
        assert_eq!(index.doc_freq("gamma"), 1);
        assert!(index.search("alpha", 5, None).is_empty());
        assert_eq!(index.search("gamma", 5, None)[0].chunk_id, "x");
    }

    #[test]
    fn document_length_is_keyed_by_identity() {
        // Ids whose numeric suffix does not match their position.
        let index = LexicalIndex::build(
            Bm25Params::default(),
            &[chunk("doc:chunk_7", "one two three"), chunk("doc:chunk_0", "four")],
        );
        assert_eq!(index.doc_length("doc:chunk_7"), Some(3));
        assert_eq!(index.doc_length("doc:chunk_0"), Some(1));
        assert_eq!(index.avg_doc_length(), 2.0);
    }
}
