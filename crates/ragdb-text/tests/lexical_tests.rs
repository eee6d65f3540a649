use ragdb_core::types::{Chunk, ChunkType, Meta, SourceKind};
use ragdb_text::{Bm25Params, LexicalIndex};

fn chunk(id: &str, kb: &str, content: &str) -> Chunk {
    Chunk {
        chunk_id: id.into(),
        kb_id: kb.into(),
        doc_id: id.split(':').next().unwrap_or(id).into(),
        parent_id: None,
        content: content.into(),
        chunk_type: ChunkType::Simple,
        parent_index: None,
        child_index: None,
        index: Some(0),
        metadata: Meta::new(),
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("a:chunk_0", "kb", "Apple releases new phone"),
        chunk("b:chunk_0", "kb", "Banana prices rise"),
        chunk("c:chunk_0", "kb", "Phone makers compete on price and apple design"),
    ]
}

#[test]
fn apple_query_ranks_apple_document_first() {
    let index = LexicalIndex::build(Bm25Params::default(), &corpus());
    let hits = index.search("Apple", 10, None);
    assert_eq!(hits[0].chunk_id, "a:chunk_0");
    assert!(hits.iter().all(|h| h.chunk_id != "b:chunk_0"));
    assert_eq!(hits[0].content, "Apple releases new phone");
    assert_eq!(hits[0].source, SourceKind::Lexical);
    assert_eq!(hits[0].kb_id(), Some("kb"));
}

#[test]
fn rebuilding_same_corpus_gives_identical_scores() {
    let mut index = LexicalIndex::default();
    index.index_documents(&corpus());
    let first = index.search("apple phone", 10, None);
    index.index_documents(&corpus());
    let second = index.search("apple phone", 10, None);
    assert_eq!(first, second);
    assert_eq!(index.doc_count(), 3);
}

#[test]
fn higher_term_frequency_never_lowers_score() {
    let filler = vec![chunk("x:chunk_0", "kb", "unrelated words here"), chunk("y:chunk_0", "kb", "more filler text")];
    let mut previous = 0.0f32;
    for repeats in 1..6 {
        let mut docs = filler.clone();
        let body = vec!["engine"; repeats].join(" ");
        docs.push(chunk("t:chunk_0", "kb", &format!("{body} start")));
        let index = LexicalIndex::build(Bm25Params::default(), &docs);
        let score = index.search("engine", 1, None)[0].score;
        assert!(score >= previous, "tf={repeats} score {score} < {previous}");
        previous = score;
    }
}

#[test]
fn score_matches_bm25_formula() {
    let docs = vec![chunk("a:chunk_0", "kb", "alpha beta"), chunk("b:chunk_0", "kb", "gamma delta epsilon zeta")];
    let index = LexicalIndex::build(Bm25Params { k1: 1.5, b: 0.75 }, &docs);
    let (n, df, tf, dl, avgdl) = (2.0f32, 1.0f32, 1.0f32, 2.0f32, 3.0f32);
    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
    let expected = idf * (tf * 2.5) / (tf + 1.5 * (1.0 - 0.75 + 0.75 * dl / avgdl));
    let got = index.search("alpha", 1, None)[0].score;
    assert!((got - expected).abs() < 1e-5, "{got} vs {expected}");
}

#[test]
fn ties_keep_insertion_order() {
    let docs = vec![chunk("z:chunk_0", "kb", "same words"), chunk("a:chunk_0", "kb", "same words"), chunk("m:chunk_0", "kb", "same words")];
    let index = LexicalIndex::build(Bm25Params::default(), &docs);
    let ids: Vec<String> = index.search("words", 10, None).into_iter().map(|h| h.chunk_id).collect();
    assert_eq!(ids, vec!["z:chunk_0", "a:chunk_0", "m:chunk_0"]);
}

#[test]
fn unknown_terms_and_empty_index_return_nothing() {
    let index = LexicalIndex::build(Bm25Params::default(), &corpus());
    assert!(index.search("kiwi", 10, None).is_empty());
    assert!(index.search("the", 10, None).is_empty());
    assert!(index.search("apple", 0, None).is_empty());
    assert!(LexicalIndex::default().search("apple", 10, None).is_empty());
}

#[test]
fn kb_filter_isolates_partitions() {
    let docs = vec![chunk("a:chunk_0", "A", "shared keyword"), chunk("b:chunk_0", "B", "shared keyword")];
    let index = LexicalIndex::build(Bm25Params::default(), &docs);
    let only_b = index.search("keyword", 10, Some(&["B".to_string()]));
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].chunk_id, "b:chunk_0");
    assert!(index.search("keyword", 10, Some(&["C".to_string()])).is_empty());
    assert_eq!(index.search("keyword", 10, None).len(), 2);
}

#[test]
fn chinese_text_matches_per_character() {
    let docs = vec![
        chunk("zh:chunk_0", "kb", "人工智能是一门综合性学科。"),
        chunk("en:chunk_0", "kb", "Artificial intelligence is broad."),
    ];
    let index = LexicalIndex::build(Bm25Params::default(), &docs);
    let hits = index.search("人工智能", 5, None);
    assert_eq!(hits.len(), 1);
    assert!(hits[0].content.contains("人工智能"));
}

#[test]
fn reset_empties_the_index() {
    let mut index = LexicalIndex::build(Bm25Params::default(), &corpus());
    assert!(!index.is_empty());
    index.reset();
    assert!(index.is_empty());
    assert_eq!(index.avg_doc_length(), 0.0);
    assert!(index.search("apple", 10, None).is_empty());
}
