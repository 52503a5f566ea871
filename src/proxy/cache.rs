// Short-TTL memoization of successful upstream payloads.
//
// The key is built from the method and caller parameters only; the timestamp
// and signature are deliberately excluded so logically identical requests hit
// regardless of when they were issued. Error responses are never cached.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::proxy::signing::stringify_value;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    inserted: Instant,
}

/// Derive the cache key from the semantically relevant fields. Caller
/// parameters are stringified and sorted the same way the canonicalizer
/// sorts them, so insertion order does not split the cache. Each field is
/// digested with a length prefix; flattening with separators would let a
/// name/value boundary shift produce the same key for different requests.
pub fn cache_key(method: &str, parameters: &serde_json::Map<String, Value>) -> String {
    let sorted: BTreeMap<&str, String> = parameters
        .iter()
        .filter_map(|(k, v)| stringify_value(v).map(|s| (k.as_str(), s)))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update((method.len() as u64).to_be_bytes());
    hasher.update(method.as_bytes());
    for (k, v) in sorted {
        hasher.update((k.len() as u64).to_be_bytes());
        hasher.update(k.as_bytes());
        hasher.update((v.len() as u64).to_be_bytes());
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Expired entries are treated as misses and evicted on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.inserted.elapsed() < self.ttl {
                    return Some(entry.payload.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Idempotent overwrite; only called with successful payloads.
    pub fn put(&self, key: String, payload: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Background sweep companion to the lazy eviction in `get`.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed = removed, "swept expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
