use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::CacheCapacityError;
use crate::types::ProviderImage;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
}

#[derive(Debug)]
struct CacheEntry {
    payload: Arc<ProviderImage>,
    size_bytes: u64,
    last_access: u64,
    inserted: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    // Monotonic tick standing in for wall-clock access time; cheap and
    // immune to clock adjustments.
    tick: u64,
}

/// Byte-budgeted image cache with strict LRU eviction, shared across
/// sessions. Memory stays bounded no matter how many images a session
/// nominally wants; API-level limits and memory pressure are decoupled.
///
/// Eviction ties (same access tick) break by insertion order, oldest first.
#[derive(Debug)]
pub struct BoundedImageCache {
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl BoundedImageCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Look up an image, marking it most-recently-used on hit.
    pub fn get(&self, key: &str) -> Option<Arc<ProviderImage>> {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.tick += 1;
        let tick = state.tick;
        let entry = state.entries.get_mut(key)?;
        entry.last_access = tick;
        Some(Arc::clone(&entry.payload))
    }

    /// Insert or replace an entry, evicting least-recently-used entries
    /// until the budget holds. A single payload larger than the whole
    /// budget is rejected, not inserted.
    pub fn put(
        &self,
        key: &str,
        payload: Arc<ProviderImage>,
        size_bytes: u64,
    ) -> Result<(), CacheCapacityError> {
        if size_bytes > self.max_bytes {
            return Err(CacheCapacityError {
                key: key.to_string(),
                size_bytes,
                max_bytes: self.max_bytes,
            });
        }

        let mut state = self.state.lock().expect("cache lock poisoned");
        if let Some(old) = state.entries.remove(key) {
            state.total_bytes -= old.size_bytes;
        }
        while state.total_bytes + size_bytes > self.max_bytes && !state.entries.is_empty() {
            Self::evict_one(&mut state);
        }
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                size_bytes,
                last_access: tick,
                inserted: tick,
            },
        );
        state.total_bytes += size_bytes;
        Ok(())
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.clear();
        state.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("cache lock poisoned");
        CacheStats {
            entry_count: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.max_bytes,
        }
    }

    fn evict_one(state: &mut CacheState) {
        let victim = state
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_access, e.inserted))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes -= entry.size_bytes;
                tracing::debug!(key = %key, size_bytes = entry.size_bytes, "evicted image");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(id: &str, size: u64) -> Arc<ProviderImage> {
        Arc::new(ProviderImage {
            id: id.to_string(),
            url: format!("https://img.example/{id}"),
            title: id.to_string(),
            thumbnail_url: None,
            source_page: None,
            resolution: None,
            size_bytes_estimate: size,
        })
    }

    #[test]
    fn evicts_least_recently_used_to_stay_under_budget() {
        let cache = BoundedImageCache::new(100);
        cache.put("a", img("a", 60), 60).unwrap();
        cache.put("b", img("b", 60), 60).unwrap();
        // "a" was least recently used and had to go.
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 60);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = BoundedImageCache::new(100);
        cache.put("a", img("a", 40), 40).unwrap();
        cache.put("b", img("b", 40), 40).unwrap();
        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a").is_some());
        cache.put("c", img("c", 40), 40).unwrap();
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn budget_holds_at_every_observation_point() {
        let cache = BoundedImageCache::new(100);
        for i in 0..20 {
            cache
                .put(&format!("k{i}"), img(&format!("k{i}"), 33), 33)
                .unwrap();
            assert!(cache.stats().total_bytes <= 100);
        }
        assert_eq!(cache.stats().entry_count, 3);
    }

    #[test]
    fn oversized_payload_is_rejected_not_inserted() {
        let cache = BoundedImageCache::new(100);
        cache.put("a", img("a", 50), 50).unwrap();
        let err = cache.put("big", img("big", 101), 101).unwrap_err();
        assert_eq!(err.key, "big");
        assert_eq!(err.max_bytes, 100);
        // Existing content untouched.
        assert!(cache.get("a").is_some());
        assert_eq!(cache.stats().total_bytes, 50);
    }

    #[test]
    fn replacing_a_key_reaccounts_bytes() {
        let cache = BoundedImageCache::new(100);
        cache.put("a", img("a", 80), 80).unwrap();
        cache.put("a", img("a", 30), 30).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 30);
    }

    #[test]
    fn eviction_ties_break_by_insertion_order() {
        let cache = BoundedImageCache::new(90);
        cache.put("first", img("first", 30), 30).unwrap();
        cache.put("second", img("second", 30), 30).unwrap();
        cache.put("third", img("third", 30), 30).unwrap();
        cache.put("fourth", img("fourth", 30), 30).unwrap();
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
    }

    #[test]
    fn clear_resets_accounting() {
        let cache = BoundedImageCache::new(100);
        cache.put("a", img("a", 60), 60).unwrap();
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(cache.get("a").is_none());
    }
}
