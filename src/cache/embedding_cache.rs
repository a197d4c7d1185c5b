use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe LRU cache for query embeddings
///
/// Repeated queries skip the embedding collaborator entirely. Bounded by
/// LRU eviction.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` embeddings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Get a cached embedding for a query
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        self.lock().get(query).cloned()
    }

    /// Store an embedding in the cache
    pub fn put(&self, query: String, embedding: Vec<f32>) {
        self.lock().put(query, embedding);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Vec<f32>>> {
        // A panic mid-put leaves the LRU structurally valid
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_get() {
        let cache = EmbeddingCache::new(10);
        cache.put("test query".to_string(), vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get("test query"), Some(vec![1.0, 2.0, 3.0]));
        assert!(cache.get("nonexistent query").is_none());
    }

    #[test]
    fn test_cache_eviction() {
        let cache = EmbeddingCache::new(2);
        cache.put("query1".to_string(), vec![1.0]);
        cache.put("query2".to_string(), vec![2.0]);
        cache.put("query3".to_string(), vec![3.0]);

        assert!(cache.get("query1").is_none());
        assert!(cache.get("query2").is_some());
        assert!(cache.get("query3").is_some());
    }

    #[test]
    fn test_cache_get_updates_lru() {
        let cache = EmbeddingCache::new(2);
        cache.put("query1".to_string(), vec![1.0]);
        cache.put("query2".to_string(), vec![2.0]);
        let _ = cache.get("query1");
        cache.put("query3".to_string(), vec![3.0]);

        assert!(cache.get("query1").is_some());
        assert!(cache.get("query2").is_none());
    }

    #[test]
    fn test_cache_len_and_clear() {
        let cache = EmbeddingCache::new(10);
        assert!(cache.is_empty());
        cache.put("query1".to_string(), vec![1.0]);
        cache.put("query2".to_string(), vec![2.0]);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_zero_capacity_clamps_to_one() {
        let cache = EmbeddingCache::new(0);
        cache.put("query1".to_string(), vec![1.0]);
        cache.put("query2".to_string(), vec![2.0]);
        assert_eq!(cache.len(), 1);
    }
}
