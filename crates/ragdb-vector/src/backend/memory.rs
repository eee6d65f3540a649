//! Brute-force in-process backend.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use ragdb_core::config::Metric;
use ragdb_core::types::is_zero_vector;

use super::{MatchFilter, ScoredRecord, VectorBackend, VectorRecord};

struct Collection {
    dimension: usize,
    metric: Metric,
    rows: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn reindex(&mut self) {
        self.positions = self.rows.iter().enumerate().map(|(i, r)| (r.chunk_id.clone(), i)).collect();
    }
}

/// Exact k-NN over rows held in memory.
///
/// Rows whose vector is all zeros carry no similarity signal: they score 0
/// and rank after every row that does.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

pub fn similarity(metric: Metric, query: &[f32], row: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => {
            let denom = norm(query) * norm(row);
            if denom > 0.0 {
                dot(query, row) / denom
            } else {
                0.0
            }
        }
        Metric::Ip => dot(query, row),
        Metric::L2 => {
            let d: f32 = query.iter().zip(row).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt();
            1.0 / (1.0 + d)
        }
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize, metric: Metric) -> anyhow::Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(collection) {
            if existing.dimension != dimension {
                bail!("collection {collection} exists with dimension {}, requested {dimension}", existing.dimension);
            }
            return Ok(());
        }
        collections.insert(
            collection.to_string(),
            Collection { dimension, metric, rows: Vec::new(), positions: HashMap::new() },
        );
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> anyhow::Result<()> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn insert(&self, collection: &str, records: Vec<VectorRecord>) -> anyhow::Result<usize> {
        let mut collections = self.collections.write().await;
        let c = collections.get_mut(collection).ok_or_else(|| anyhow!("collection {collection} does not exist"))?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != c.dimension) {
            bail!("dim mismatch for {}: got {} expected {}", bad.chunk_id, bad.vector.len(), c.dimension);
        }
        let written = records.len();
        for record in records {
            match c.positions.get(&record.chunk_id) {
                Some(&at) => c.rows[at] = record,
                None => {
                    c.positions.insert(record.chunk_id.clone(), c.rows.len());
                    c.rows.push(record);
                }
            }
        }
        Ok(written)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MatchFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>> {
        let collections = self.collections.read().await;
        let c = collections.get(collection).ok_or_else(|| anyhow!("collection {collection} does not exist"))?;
        if vector.len() != c.dimension {
            bail!("query dim mismatch: got {} expected {}", vector.len(), c.dimension);
        }
        if top_k == 0 || is_zero_vector(vector) {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(bool, f32, &VectorRecord)> = c
            .rows
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .map(|r| {
                if is_zero_vector(&r.vector) {
                    (false, 0.0, r)
                } else {
                    (true, similarity(c.metric, vector, &r.vector), r)
                }
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.total_cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, score, r)| ScoredRecord { record: r.clone(), score })
            .collect())
    }

    async fn delete(&self, collection: &str, filter: &MatchFilter) -> anyhow::Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(c) = collections.get_mut(collection) else { return Ok(0) };
        let before = c.rows.len();
        c.rows.retain(|r| !filter.matches(r));
        let removed = before - c.rows.len();
        if removed > 0 {
            c.reindex();
        }
        Ok(removed)
    }

    async fn count(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<usize> {
        let collections = self.collections.read().await;
        let Some(c) = collections.get(collection) else { return Ok(0) };
        Ok(c.rows.iter().filter(|r| filter.map_or(true, |f| f.matches(r))).count())
    }

    async fn scan(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        let Some(c) = collections.get(collection) else { return Ok(Vec::new()) };
        Ok(c.rows.iter().filter(|r| filter.map_or(true, |f| f.matches(r))).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_similarity_decreases_with_distance() {
        let q = [1.0, 0.0];
        assert_eq!(similarity(Metric::L2, &q, &q), 1.0);
        assert!(similarity(Metric::L2, &q, &[0.0, 1.0]) > similarity(Metric::L2, &q, &[-3.0, 0.0]));
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let s = similarity(Metric::Cosine, &[1.0, 1.0], &[5.0, 5.0]);
        assert!((s - 1.0).abs() < 1e-6);
        assert_eq!(similarity(Metric::Ip, &[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
