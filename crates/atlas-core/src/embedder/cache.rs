//! Process-local embedding cache.
//!
//! Keyed by `(purpose, text)` where the text is folded into an xxh3-128
//! digest. Entries expire after a bounded time window and the map is
//! capacity-bounded; eviction runs lazily on insert. Writers overwrite on
//! conflict.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// What an embedding is for. Keys are namespaced per purpose so a query
/// and its enhanced variant never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedPurpose {
    /// Raw query embedding.
    Query,
    /// Query embedding with the code-context appendix.
    QueryEnhanced,
    /// Code chunk embedding.
    Chunk,
    /// File summary embedding.
    Summary,
    /// Symbol definition embedding.
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    purpose: EmbedPurpose,
    text_digest: u128,
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Bounded time-window cache for embedding vectors.
pub struct EmbeddingCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
}

impl EmbeddingCache {
    /// Create a cache with the given time-to-live and capacity.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn key(purpose: EmbedPurpose, text: &str) -> CacheKey {
        CacheKey {
            purpose,
            text_digest: xxhash_rust::xxh3::xxh3_128(text.as_bytes()),
        }
    }

    /// Look up a vector. Expired entries read as absent.
    pub fn get(&self, purpose: EmbedPurpose, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(purpose, text);
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.vector.clone())
    }

    /// Insert a vector, evicting expired and oldest entries as needed.
    pub fn put(&self, purpose: EmbedPurpose, text: &str, vector: Vec<f32>) {
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            Self::key(purpose, text),
            CacheEntry { vector, inserted_at: Instant::now() },
        );
    }

    /// Number of live entries (expired entries may still be counted until
    /// the next eviction sweep).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);

        // Still at capacity after dropping the expired: drop the oldest.
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| *e.key());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_read_is_bit_identical() {
        let cache = EmbeddingCache::new(Duration::from_secs(60), 16);
        let vector = vec![0.25f32, -0.5, 0.125];
        cache.put(EmbedPurpose::Query, "how to cache", vector.clone());

        let first = cache.get(EmbedPurpose::Query, "how to cache").expect("hit");
        let second = cache.get(EmbedPurpose::Query, "how to cache").expect("hit");
        assert_eq!(first, vector);
        assert_eq!(first, second);
    }

    #[test]
    fn purposes_do_not_collide() {
        let cache = EmbeddingCache::new(Duration::from_secs(60), 16);
        cache.put(EmbedPurpose::Query, "q", vec![1.0]);
        cache.put(EmbedPurpose::QueryEnhanced, "q", vec![2.0]);
        assert_eq!(cache.get(EmbedPurpose::Query, "q"), Some(vec![1.0]));
        assert_eq!(cache.get(EmbedPurpose::QueryEnhanced, "q"), Some(vec![2.0]));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = EmbeddingCache::new(Duration::ZERO, 16);
        cache.put(EmbedPurpose::Chunk, "text", vec![1.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(EmbedPurpose::Chunk, "text").is_none());
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = EmbeddingCache::new(Duration::from_secs(60), 4);
        for i in 0..32 {
            cache.put(EmbedPurpose::Chunk, &format!("text-{i}"), vec![i as f32]);
        }
        assert!(cache.len() <= 4);
    }
}
