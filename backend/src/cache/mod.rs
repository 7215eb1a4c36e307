//! Stage result cache - memoize per-file stage outputs by chain fingerprint
//!
//! A fingerprint covers the raw input content and every stage of the chain up
//! to and including the stage being computed, so editing stage k changes the
//! keys of k and everything after it while earlier keys stay valid.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::{StageId, StageResult};

/// Fingerprint of one more link in a stage chain.
///
/// `parameters` must be a `serde_json::Value` so map keys serialize sorted.
pub fn chain_fingerprint(
    previous: &str,
    stage: StageId,
    enabled: bool,
    parameters: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(b"|");
    hasher.update(stage.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(if enabled { b"1" } else { b"0" });
    hasher.update(b"|");
    hasher.update(parameters.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe fingerprint -> result map shared by all workers.
///
/// Concurrent misses on one key may both compute and insert; results are
/// deterministic so either write is equivalent.
#[derive(Debug, Default)]
pub struct CacheManager {
    entries: RwLock<HashMap<String, Arc<StageResult>>>,
    /// Source fingerprint -> keys computed from that source
    by_source: RwLock<HashMap<String, HashSet<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a result, counting the hit or miss
    pub fn get(&self, key: &str) -> Option<Arc<StageResult>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a result computed from the source with fingerprint `source`
    pub fn insert(&self, source: &str, key: String, result: Arc<StageResult>) {
        self.by_source
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source.to_string())
            .or_default()
            .insert(key.clone());

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, result);
    }

    /// Drop every entry derived from one source. Returns the number removed.
    pub fn evict_source(&self, source: &str) -> usize {
        let keys = self
            .by_source
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source)
            .unwrap_or_default();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        keys.iter().filter(|k| entries.remove(*k).is_some()).count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.by_source.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dataset;
    use serde_json::json;

    fn result() -> Arc<StageResult> {
        Arc::new(StageResult::unchanged(Arc::new(Dataset::new(vec!["sec".into()], vec![]))))
    }

    #[test]
    fn test_fingerprint_depends_on_every_input() {
        let params = json!({"window": 50});
        let base = chain_fingerprint("abc", StageId::StaticStartTrimmer, true, &params);

        assert_eq!(base, chain_fingerprint("abc", StageId::StaticStartTrimmer, true, &params));
        assert_ne!(base, chain_fingerprint("abd", StageId::StaticStartTrimmer, true, &params));
        assert_ne!(base, chain_fingerprint("abc", StageId::StaticStartTrimmer, false, &params));
        assert_ne!(base, chain_fingerprint("abc", StageId::StaticSampleRemover, true, &params));
        assert_ne!(
            base,
            chain_fingerprint("abc", StageId::StaticStartTrimmer, true, &json!({"window": 51}))
        );
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(
            chain_fingerprint("x", StageId::SizeFilter, true, &a),
            chain_fingerprint("x", StageId::SizeFilter, true, &b)
        );
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = CacheManager::new();
        assert!(cache.get("k1").is_none());

        cache.insert("src", "k1".into(), result());
        assert!(cache.get("k1").is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evict_source_only_touches_its_keys() {
        let cache = CacheManager::new();
        cache.insert("a", "a1".into(), result());
        cache.insert("a", "a2".into(), result());
        cache.insert("b", "b1".into(), result());

        assert_eq!(cache.evict_source("a"), 2);
        assert!(!cache.contains("a1"));
        assert!(cache.contains("b1"));
        assert_eq!(cache.evict_source("a"), 0);
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = Arc::new(CacheManager::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.insert("src", format!("k{}", i % 4), result());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
