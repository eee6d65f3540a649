//! Boundary-aware recursive text splitting.
//!
//! Sizes and overlaps are measured in characters, not bytes, so CJK text is
//! split on the same scale as Latin text.

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkType, Document, Meta};

pub struct Chunker {
    strategy: ChunkStrategy,
    parent_size: usize,
    parent_overlap: usize,
    child_size: usize,
    child_overlap: usize,
    separators: Vec<Vec<char>>,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        if config.child_size == 0 || config.child_overlap >= config.child_size {
            return Err(Error::InvalidConfig(format!(
                "invalid child chunking: size {} overlap {}",
                config.child_size, config.child_overlap
            )));
        }
        if config.strategy == ChunkStrategy::ParentChild
            && (config.parent_size == 0 || config.parent_overlap >= config.parent_size)
        {
            return Err(Error::InvalidConfig(format!(
                "invalid parent chunking: size {} overlap {}",
                config.parent_size, config.parent_overlap
            )));
        }
        Ok(Self {
            strategy: config.strategy,
            parent_size: config.parent_size,
            parent_overlap: config.parent_overlap,
            child_size: config.child_size,
            child_overlap: config.child_overlap,
            separators: config.separators.iter().map(|s| s.chars().collect()).collect(),
        })
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Splits a document into its chunk tree. Source metadata and the
    /// document's own metadata are copied onto every chunk.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let mut metadata = doc.source.to_meta();
        metadata.extend(doc.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        match self.strategy {
            ChunkStrategy::Simple => self.chunk_simple(doc, &metadata),
            ChunkStrategy::ParentChild => self.chunk_parent_child(doc, &metadata),
        }
    }

    fn chunk_simple(&self, doc: &Document, metadata: &Meta) -> Vec<Chunk> {
        self.split_text(&doc.text, self.child_size, self.child_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk {
                chunk_id: format!("{}:chunk_{i}", doc.doc_id),
                kb_id: doc.kb_id.clone(),
                doc_id: doc.doc_id.clone(),
                parent_id: None,
                content,
                chunk_type: ChunkType::Simple,
                parent_index: None,
                child_index: None,
                index: Some(i),
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn chunk_parent_child(&self, doc: &Document, metadata: &Meta) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (i, parent) in self.split_text(&doc.text, self.parent_size, self.parent_overlap).into_iter().enumerate() {
            let parent_id = format!("{}:parent_{i}", doc.doc_id);
            let mut children = self.split_text(&parent, self.child_size, self.child_overlap);
            if children.is_empty() {
                children.push(parent.clone());
            }
            chunks.push(Chunk {
                chunk_id: parent_id.clone(),
                kb_id: doc.kb_id.clone(),
                doc_id: doc.doc_id.clone(),
                parent_id: None,
                content: parent,
                chunk_type: ChunkType::Parent,
                parent_index: Some(i),
                child_index: None,
                index: None,
                metadata: metadata.clone(),
            });
            for (j, content) in children.into_iter().enumerate() {
                chunks.push(Chunk {
                    chunk_id: format!("{}:child_{i}_{j}", doc.doc_id),
                    kb_id: doc.kb_id.clone(),
                    doc_id: doc.doc_id.clone(),
                    parent_id: Some(parent_id.clone()),
                    content,
                    chunk_type: ChunkType::Child,
                    parent_index: Some(i),
                    child_index: Some(j),
                    index: None,
                    metadata: metadata.clone(),
                });
            }
        }
        chunks
    }

    /// Splits `text` into trimmed, non-empty pieces of at most `size` characters.
    ///
    /// Each cut lands just after the last occurrence of the strongest
    /// separator inside the window, or exactly at `size` when none occurs. The
    /// next piece starts `overlap` characters before the cut, pulled back to
    /// the nearest separator boundary when one exists.
    pub fn split_text(&self, text: &str, size: usize, overlap: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut pieces = Vec::new();
        if size == 0 {
            return pieces;
        }
        let mut rest: &[char] = &chars;
        while !rest.is_empty() {
            if rest.len() <= size {
                push_trimmed(&mut pieces, rest);
                break;
            }

            let split = match self.find_split_point(&rest[..size]) {
                0 => size,
                at => at,
            };
            push_trimmed(&mut pieces, &rest[..split]);

            let raw_next = if split > overlap { split - overlap } else { split };
            let mut next = raw_next;
            if split > overlap && raw_next > 0 {
                let boundary = self.find_split_point(&rest[..raw_next]);
                if boundary > 0 {
                    next = boundary;
                }
            }
            if next == 0 {
                next = split;
            }
            rest = &rest[next..];
        }
        pieces
    }

    /// Position just past the last occurrence of the strongest separator in
    /// `window`, or 0 when no separator occurs.
    fn find_split_point(&self, window: &[char]) -> usize {
        for sep in &self.separators {
            if sep.is_empty() || sep.len() > window.len() {
                continue;
            }
            if let Some(idx) = (0..=window.len() - sep.len()).rev().find(|&i| window[i..i + sep.len()] == sep[..]) {
                return idx + sep.len();
            }
        }
        0
    }
}

fn push_trimmed(out: &mut Vec<String>, piece: &[char]) {
    let s: String = piece.iter().collect();
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Rebuilds readable context from chunks.
///
/// Children are grouped under their parent in first-seen order and joined by
/// a blank line in `child_index` order; other chunks follow unchanged. The
/// segments are then packed greedily into texts of at most `max_size`
/// characters, separator included. `max_size == 0` skips packing.
pub fn merge_chunks(chunks: &[Chunk], max_size: usize) -> Vec<String> {
    let mut groups: Vec<(&str, Vec<&Chunk>)> = Vec::new();
    let mut standalone = Vec::new();
    for chunk in chunks {
        match chunk.parent_id.as_deref() {
            Some(parent_id) => match groups.iter_mut().find(|(id, _)| *id == parent_id) {
                Some((_, group)) => group.push(chunk),
                None => groups.push((parent_id, vec![chunk])),
            },
            None => standalone.push(chunk.content.clone()),
        }
    }

    let mut segments: Vec<String> = groups
        .into_iter()
        .map(|(_, mut group)| {
            group.sort_by_key(|c| c.child_index.unwrap_or(0));
            group.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n\n")
        })
        .collect();
    segments.extend(standalone);

    if max_size == 0 {
        return segments;
    }

    let mut packed = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for segment in segments {
        let len = segment.chars().count();
        if current.is_empty() {
            current = segment;
            current_len = len;
        } else if current_len + 2 + len <= max_size {
            current.push_str("\n\n");
            current.push_str(&segment);
            current_len += 2 + len;
        } else {
            packed.push(std::mem::replace(&mut current, segment));
            current_len = len;
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}
