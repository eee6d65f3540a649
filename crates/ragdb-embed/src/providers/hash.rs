use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use ragdb_core::traits::EmbeddingProvider;
use ragdb_text::Analyzer;

/// Deterministic bag-of-terms embedder for offline use and tests.
///
/// Each analyzer term is hashed into one of `dim` buckets; the result is
/// L2-normalised. Texts sharing terms get positive cosine similarity.
pub struct HashEmbedder {
    id: String,
    dim: usize,
    analyzer: Analyzer,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { id: format!("hash:xxh64:d{dim}"), dim, analyzer: Analyzer::new() }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        if self.dim == 0 {
            return v;
        }
        for term in self.analyzer.tokenize(text) {
            let mut hasher = XxHash64::with_seed(0);
            term.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + val;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn deterministic_and_normalised() {
        let e = HashEmbedder::new(64);
        let a = e.embed_text("solar panel wiring");
        assert_eq!(a, e.embed_text("solar panel wiring"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn shared_terms_score_higher() {
        let e = HashEmbedder::new(256);
        let q = e.embed_text("人工智能");
        let near = e.embed_text("人工智能是一门综合性学科");
        let far = e.embed_text("banana prices rise");
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn text_without_terms_is_zero() {
        let e = HashEmbedder::new(8);
        assert!(e.embed_text("。，!").iter().all(|x| *x == 0.0));
    }
}
