//! In-memory TTL cache.

use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::glob_match;
use super::ResponseCache;

/// Maximum cached responses before LRU eviction.
const MAX_CACHE_ENTRIES: usize = 10_000;

struct Slot {
    expires_at: Instant,
    value: Vec<u8>,
}

/// LRU-bounded in-memory response cache with lazy expiry.
pub struct MemoryCache {
    slots: Mutex<LruCache<String, Slot>>,
}

impl MemoryCache {
    /// Empty cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_ENTRIES)
    }

    /// Empty cache holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of live entries, counting expired-but-unswept slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.value.clone()),
            Some(_) => {
                slots.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.slots.lock().put(
            key.to_string(),
            Slot {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    async fn del(&self, key: &str) {
        self.slots.lock().pop(key);
    }

    async fn del_pattern(&self, pattern: &str) -> usize {
        let mut slots = self.slots.lock();
        let matched: Vec<String> = slots
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matched {
            slots.pop(key);
        }
        matched.len()
    }
}
