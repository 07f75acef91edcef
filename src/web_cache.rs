use lru::LruCache;
use serde_json::value::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheValue {
    value: Value,
    inserted: Instant,
}

/// LRU of upstream responses that rarely change (route catalog, patterns).
/// Entries older than `ttl` are treated as missing.
pub struct ResponseCache {
    inner: Mutex<LruCache<u64, CacheValue>>,
    ttl: Duration,
}

pub fn cache_key(class: &str, args: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    class.hash(&mut hasher);
    for arg in args {
        "ARG".hash(&mut hasher);
        arg.hash(&mut hasher);
    }
    hasher.finish()
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ResponseCache {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: u64) -> Option<Value> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = cache.get(&key).map(|v| v.inserted.elapsed() < self.ttl)?;
        if fresh {
            cache.get(&key).map(|v| v.value.clone())
        } else {
            cache.pop(&key);
            None
        }
    }

    pub fn insert(&self, key: u64, value: Value) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            key,
            CacheValue {
                value,
                inserted: Instant::now(),
            },
        );
    }
}
