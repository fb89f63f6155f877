//! Run-scoped memoization of scanner results.
//!
//! A [`ScanCache`] belongs to exactly one run (construction fails on an empty
//! `run_id`) and is never shared across runs. Entries are keyed by
//! `(payload fingerprint, scanner_id)` and evicted least-recently-used once
//! `max_size` is reached; an optional TTL expires entries lazily on read.
//!
//! Writers: only the scanner functions in [`crate::guards::scanners`] store
//! results, which is why `store_result` is crate-private. Validators and
//! enrichers read through [`ScanCache::get_result`] and
//! [`ScanCache::results_for_step`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::fingerprint;

/// Errors produced by the scan cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanCacheError {
    #[error("scan cache requires a non-empty run_id")]
    EmptyRunId,

    #[error("scan cache max_size must be at least 1")]
    ZeroCapacity,
}

/// Capacity and expiry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCacheConfig {
    pub max_size: usize,
    /// Entries older than this are dropped on read. `None` disables expiry.
    pub ttl_ms: Option<u64>,
}

impl Default for ScanCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            ttl_ms: None,
        }
    }
}

/// Cache key: payload fingerprint plus the scanner that produced the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub fingerprint: String,
    pub scanner_id: String,
}

/// A stored scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub fingerprint: String,
    pub scanner_id: String,
    /// Wall-clock store time, for display only.
    pub timestamp: DateTime<Utc>,
    pub results: Value,
    pub evidence: Value,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    record: ScanRecord,
    stored_at: Instant,
    last_access: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    by_step: HashMap<String, Vec<CacheKey>>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        for keys in self.by_step.values_mut() {
            keys.retain(|k| k != key);
        }
        self.by_step.retain(|_, keys| !keys.is_empty());
    }

    fn evict_lru(&mut self) -> Option<CacheKey> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone())?;
        self.remove(&victim);
        self.evictions += 1;
        Some(victim)
    }
}

/// Fingerprint-keyed, LRU-bounded store bound to one run.
pub struct ScanCache {
    run_id: String,
    config: ScanCacheConfig,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ScanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCache")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ScanCache {
    pub fn new(run_id: impl Into<String>) -> Result<Self, ScanCacheError> {
        Self::with_config(run_id, ScanCacheConfig::default())
    }

    pub fn with_config(
        run_id: impl Into<String>,
        config: ScanCacheConfig,
    ) -> Result<Self, ScanCacheError> {
        let run_id = run_id.into();
        if run_id.trim().is_empty() {
            return Err(ScanCacheError::EmptyRunId);
        }
        if config.max_size == 0 {
            return Err(ScanCacheError::ZeroCapacity);
        }
        Ok(Self {
            run_id,
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> ScanCacheConfig {
        self.config
    }

    // A panic while holding the lock cannot leave `Inner` half-updated in a way
    // that matters for correctness (worst case: a stale step index entry).
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.config
            .ttl_ms
            .is_some_and(|ttl| entry.stored_at.elapsed() > Duration::from_millis(ttl))
    }

    /// Store (or overwrite) the result of `scanner_id` for `payload`.
    pub(crate) fn store_result(
        &self,
        payload: &Value,
        scanner_id: &str,
        results: Value,
        evidence: Option<Value>,
        step_id: Option<&str>,
    ) -> CacheKey {
        let key = CacheKey {
            fingerprint: fingerprint(payload),
            scanner_id: scanner_id.to_string(),
        };

        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_size {
            if let Some(evicted) = inner.evict_lru() {
                crate::obs::emit_cache_eviction(&self.run_id, &evicted.fingerprint, &evicted.scanner_id);
            }
        }

        let last_access = inner.next_tick();
        inner.entries.insert(
            key.clone(),
            Entry {
                record: ScanRecord {
                    fingerprint: key.fingerprint.clone(),
                    scanner_id: key.scanner_id.clone(),
                    timestamp: Utc::now(),
                    results,
                    evidence: evidence.unwrap_or(Value::Null),
                },
                stored_at: Instant::now(),
                last_access,
            },
        );
        if let Some(step_id) = step_id {
            let keys = inner.by_step.entry(step_id.to_string()).or_default();
            if !keys.contains(&key) {
                keys.push(key.clone());
            }
        }
        key
    }

    /// Associate an existing entry with another step (a cache hit from a
    /// later step). Returns `false` if the entry is gone.
    pub(crate) fn link_step(&self, payload: &Value, scanner_id: &str, step_id: &str) -> bool {
        let key = CacheKey {
            fingerprint: fingerprint(payload),
            scanner_id: scanner_id.to_string(),
        };
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) {
            return false;
        }
        let keys = inner.by_step.entry(step_id.to_string()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
        true
    }

    /// Cached result for `payload` from `scanner_id`, if present and fresh.
    pub fn get_result(&self, payload: &Value, scanner_id: &str) -> Option<ScanRecord> {
        let key = CacheKey {
            fingerprint: fingerprint(payload),
            scanner_id: scanner_id.to_string(),
        };

        let mut inner = self.lock();
        let expired = match inner.entries.get(&key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry),
        };
        if expired {
            inner.remove(&key);
            inner.misses += 1;
            return None;
        }

        let tick = inner.next_tick();
        inner.hits += 1;
        let entry = inner.entries.get_mut(&key)?;
        entry.last_access = tick;
        Some(entry.record.clone())
    }

    /// Fresh results associated with a step, in store order. Does not touch
    /// LRU recency.
    pub fn results_for_step(&self, step_id: &str) -> Vec<ScanRecord> {
        let inner = self.lock();
        inner
            .by_step
            .get(step_id)
            .into_iter()
            .flatten()
            .filter_map(|k| inner.entries.get(k))
            .filter(|e| !self.is_expired(e))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_run_id_rejected() {
        assert_eq!(ScanCache::new("").unwrap_err(), ScanCacheError::EmptyRunId);
        assert_eq!(ScanCache::new("  ").unwrap_err(), ScanCacheError::EmptyRunId);
        let zero = ScanCacheConfig {
            max_size: 0,
            ttl_ms: None,
        };
        assert_eq!(
            ScanCache::with_config("r", zero).unwrap_err(),
            ScanCacheError::ZeroCapacity
        );
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = ScanCache::with_config(
            "r1",
            ScanCacheConfig {
                max_size: 2,
                ttl_ms: None,
            },
        )
        .unwrap();
        let (p1, p2, p3) = (json!({"p": 1}), json!({"p": 2}), json!({"p": 3}));
        cache.store_result(&p1, "dlp", json!([1]), None, None);
        cache.store_result(&p2, "dlp", json!([2]), None, None);
        cache.store_result(&p3, "dlp", json!([3]), None, None);

        assert!(cache.get_result(&p1, "dlp").is_none());
        assert!(cache.get_result(&p2, "dlp").is_some());
        assert!(cache.get_result(&p3, "dlp").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_read_refreshes_recency() {
        let cache = ScanCache::with_config(
            "r1",
            ScanCacheConfig {
                max_size: 2,
                ttl_ms: None,
            },
        )
        .unwrap();
        let (p1, p2, p3) = (json!("a"), json!("b"), json!("c"));
        cache.store_result(&p1, "s", json!(1), None, None);
        cache.store_result(&p2, "s", json!(2), None, None);
        assert!(cache.get_result(&p1, "s").is_some());
        cache.store_result(&p3, "s", json!(3), None, None);

        assert!(cache.get_result(&p1, "s").is_some());
        assert!(cache.get_result(&p2, "s").is_none());
    }

    #[test]
    fn test_overwrite_same_key_does_not_duplicate() {
        let cache = ScanCache::new("r").unwrap();
        let p = json!({"x": 1});
        cache.store_result(&p, "dlp", json!("first"), None, Some("s1"));
        cache.store_result(&p, "dlp", json!("second"), None, Some("s1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_result(&p, "dlp").unwrap().results, json!("second"));
        assert_eq!(cache.results_for_step("s1").len(), 1);
    }

    #[test]
    fn test_repeated_get_is_idempotent() {
        let cache = ScanCache::new("r").unwrap();
        let p = json!({"x": [1, 2]});
        cache.store_result(&p, "semantic", json!({"m": 1}), Some(json!({"e": true})), None);
        let a = cache.get_result(&p, "semantic").unwrap();
        let b = cache.get_result(&p, "semantic").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_scanner_id_is_part_of_key() {
        let cache = ScanCache::new("r").unwrap();
        let p = json!("payload");
        cache.store_result(&p, "dlp", json!(1), None, None);
        assert!(cache.get_result(&p, "semantic").is_none());
    }

    #[test]
    fn test_ttl_expires_on_read() {
        let cache = ScanCache::with_config(
            "r",
            ScanCacheConfig {
                max_size: 10,
                ttl_ms: Some(1),
            },
        )
        .unwrap();
        let p = json!("old");
        cache.store_result(&p, "dlp", json!(1), None, Some("s"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get_result(&p, "dlp").is_none());
        assert!(cache.is_empty());
        assert!(cache.results_for_step("s").is_empty());
    }
}
