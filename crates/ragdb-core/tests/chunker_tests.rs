use std::collections::HashSet;

use ragdb_core::chunker::{merge_chunks, Chunker};
use ragdb_core::config::{ChunkStrategy, ChunkingConfig};
use ragdb_core::types::{Chunk, ChunkType, Document, Meta, SourceInfo};

fn simple(size: usize, overlap: usize) -> Chunker {
    Chunker::new(&ChunkingConfig {
        strategy: ChunkStrategy::Simple,
        child_size: size,
        child_overlap: overlap,
        ..ChunkingConfig::default()
    })
    .expect("chunker")
}

fn parent_child(parent: (usize, usize), child: (usize, usize)) -> Chunker {
    Chunker::new(&ChunkingConfig {
        strategy: ChunkStrategy::ParentChild,
        parent_size: parent.0,
        parent_overlap: parent.1,
        child_size: child.0,
        child_overlap: child.1,
        ..ChunkingConfig::default()
    })
    .expect("chunker")
}

fn doc(text: &str) -> Document {
    Document::new("d1", "kb", text)
}

#[test]
fn blank_input_yields_no_chunks() {
    let c = simple(100, 20);
    assert!(c.chunk(&doc("")).is_empty());
    assert!(c.chunk(&doc("  \n\n\t ")).is_empty());
    assert!(parent_child((200, 50), (50, 10)).chunk(&doc(" \n ")).is_empty());
}

#[test]
fn short_text_is_one_trimmed_chunk() {
    let chunks = simple(100, 20).chunk(&doc("  hello world \n"));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "hello world");
    assert_eq!(chunks[0].chunk_id, "d1:chunk_0");
    assert_eq!(chunks[0].chunk_type, ChunkType::Simple);
    assert_eq!(chunks[0].index, Some(0));
}

#[test]
fn chunks_respect_size_and_cover_every_word() {
    let words: Vec<String> = (0..200).map(|i| format!("w{i}")).collect();
    let text = words.join(" ");
    let pieces = simple(30, 8).split_text(&text, 30, 8);
    assert!(pieces.len() > 1);
    for p in &pieces {
        assert!(p.chars().count() <= 30, "piece too long: {p:?}");
    }
    let seen: HashSet<&str> = pieces.iter().flat_map(|p| p.split_whitespace()).collect();
    for w in &words {
        assert!(seen.contains(w.as_str()), "missing {w}");
    }
}

#[test]
fn forced_cuts_keep_exact_overlap() {
    let text = "abcdefghij".repeat(5);
    let pieces = simple(10, 3).split_text(&text, 10, 3);
    assert_eq!(pieces.len(), 7);
    for pair in pieces.windows(2) {
        let prev: Vec<char> = pair[0].chars().collect();
        let next: Vec<char> = pair[1].chars().collect();
        assert_eq!(prev.len(), 10);
        assert_eq!(&prev[7..], &next[..3]);
    }
    let rebuilt: String = pieces[0].chars().chain(pieces[1..].iter().flat_map(|p| p.chars().skip(3))).collect();
    assert_eq!(rebuilt, text);
}

#[test]
fn chinese_sentences_split_on_full_stops() {
    let text = "人工智能是一门综合性学科。".repeat(30);
    let chunks = simple(100, 20).chunk(&doc(&text));
    assert!(chunks.len() > 1);
    for c in &chunks {
        assert!(c.content.chars().count() <= 100);
        assert!(c.content.ends_with('。'), "cut mid-sentence: {}", c.content);
        assert!(c.content.starts_with('人'), "started mid-sentence: {}", c.content);
    }
}

#[test]
fn children_reference_parents_from_same_pass() {
    let text = "Sentence number one is here. ".repeat(40);
    let chunks = parent_child((200, 40), (60, 15)).chunk(&doc(&text));

    let parents: HashSet<&str> = chunks
        .iter()
        .filter(|c| c.chunk_type == ChunkType::Parent)
        .map(|c| c.chunk_id.as_str())
        .collect();
    assert!(parents.len() > 1);

    let children: Vec<&Chunk> = chunks.iter().filter(|c| c.chunk_type == ChunkType::Child).collect();
    assert!(children.len() > parents.len());
    for child in &children {
        let parent_id = child.parent_id.as_deref().expect("child without parent");
        assert!(parents.contains(parent_id));
        assert!(child.content.chars().count() <= 60);
        assert!(child.child_index.is_some());
    }
    for parent in chunks.iter().filter(|c| c.chunk_type == ChunkType::Parent) {
        assert!(parent.parent_id.is_none());
        assert!(parent.content.chars().count() <= 200);
    }

    let ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids.len(), chunks.len(), "chunk ids must be unique");
}

#[test]
fn small_parent_becomes_its_own_child() {
    let chunks = parent_child((200, 40), (60, 15)).chunk(&doc("tiny"));
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chunk_id, "d1:parent_0");
    assert_eq!(chunks[1].chunk_id, "d1:child_0_0");
    assert_eq!(chunks[1].parent_id.as_deref(), Some("d1:parent_0"));
    assert_eq!(chunks[1].content, chunks[0].content);
}

#[test]
fn source_metadata_is_copied_to_every_chunk() {
    let mut extra = Meta::new();
    extra.insert("author".into(), "ops".into());
    let document = doc(&"alpha beta gamma. ".repeat(20))
        .with_source(SourceInfo { filename: Some("a.txt".into()), format: Some("txt".into()), size: Some(360) })
        .with_metadata(extra);
    let chunks = simple(50, 10).chunk(&document);
    assert!(chunks.len() > 1);
    for c in &chunks {
        assert_eq!(c.metadata.get("filename").and_then(|v| v.as_str()), Some("a.txt"));
        assert_eq!(c.metadata.get("author").and_then(|v| v.as_str()), Some("ops"));
        assert_eq!(c.kb_id, "kb");
        assert_eq!(c.doc_id, "d1");
    }
}

#[test]
fn overlap_not_smaller_than_size_is_rejected() {
    let err = Chunker::new(&ChunkingConfig {
        strategy: ChunkStrategy::Simple,
        child_size: 10,
        child_overlap: 10,
        ..ChunkingConfig::default()
    });
    assert!(err.is_err());
}

fn child(parent: &str, index: usize, content: &str) -> Chunk {
    Chunk {
        chunk_id: format!("{parent}_{index}"),
        kb_id: "kb".into(),
        doc_id: "d1".into(),
        parent_id: Some(parent.into()),
        content: content.into(),
        chunk_type: ChunkType::Child,
        parent_index: Some(0),
        child_index: Some(index),
        index: None,
        metadata: Meta::new(),
    }
}

#[test]
fn merge_groups_children_in_order_then_packs() {
    let standalone = Chunk { parent_id: None, chunk_type: ChunkType::Simple, child_index: None, ..child("x", 0, "c") };
    let chunks = vec![child("p0", 1, "b"), child("p0", 0, "a"), standalone];

    assert_eq!(merge_chunks(&chunks, 0), vec!["a\n\nb".to_string(), "c".to_string()]);
    assert_eq!(merge_chunks(&chunks, 6), vec!["a\n\nb".to_string(), "c".to_string()]);
    assert_eq!(merge_chunks(&chunks, 7), vec!["a\n\nb\n\nc".to_string()]);
    assert!(merge_chunks(&[], 100).is_empty());
}
