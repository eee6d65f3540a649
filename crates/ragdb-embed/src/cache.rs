//! In-process embedding cache keyed by `(embedder_id, content_hash)`.
//!
//! Consulted before calling a provider and written through on misses. Only
//! real vectors are stored; the zero vector of a failed call never is.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use ragdb_core::types::is_zero_vector;

pub fn hash_content(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

type Key = (String, String);

#[derive(Default)]
struct Slots {
    map: HashMap<Key, Vec<f32>>,
    order: VecDeque<Key>,
}

/// Bounded cache with first-in first-out eviction.
pub struct EmbeddingCache {
    capacity: usize,
    slots: Mutex<Slots>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, slots: Mutex::new(Slots::default()) }
    }

    pub fn get(&self, embedder_id: &str, content_hash: &str) -> Option<Vec<f32>> {
        let slots = self.slots.lock().ok()?;
        slots.map.get(&(embedder_id.to_string(), content_hash.to_string())).cloned()
    }

    pub fn put(&self, embedder_id: &str, content_hash: &str, vector: &[f32]) {
        if self.capacity == 0 || is_zero_vector(vector) {
            return;
        }
        let Ok(mut slots) = self.slots.lock() else { return };
        let key = (embedder_id.to_string(), content_hash.to_string());
        if slots.map.insert(key.clone(), vector.to_vec()).is_none() {
            slots.order.push_back(key);
        }
        while slots.map.len() > self.capacity {
            let Some(oldest) = slots.order.pop_front() else { break };
            slots.map.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let cache = EmbeddingCache::new(2);
        cache.put("e", "h1", &[1.0]);
        cache.put("e", "h2", &[2.0]);
        cache.put("e", "h3", &[3.0]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("e", "h1").is_none());
        assert_eq!(cache.get("e", "h3"), Some(vec![3.0]));
    }

    #[test]
    fn zero_vectors_and_other_embedders_miss() {
        let cache = EmbeddingCache::new(8);
        cache.put("e", "h", &[0.0, 0.0]);
        assert!(cache.is_empty());
        cache.put("e", "h", &[0.5, 0.5]);
        assert!(cache.get("other", "h").is_none());
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
    }
}
