//! Response Cache
//!
//! Bounded key/value store of normalized model responses with a per-entry
//! time-to-live and least-recently-used eviction.
//!
//! # Keys
//!
//! [`cache_key`] hashes a canonical JSON rendering of the adapter id and
//! every request field that influences the output. Object keys serialize in
//! sorted order, so logically identical requests always produce the same key
//! regardless of how their parameter maps were built.
//!
//! # Expiry
//!
//! An entry whose TTL has elapsed is treated as absent and removed the moment
//! it is touched. `purge_expired` sweeps the rest.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::adapter::{AdapterRequest, ModelResponse};
use crate::config::CacheConfig;

/// Stable cache key for `(adapter_id, request)`
#[must_use]
pub fn cache_key(adapter_id: &str, request: &AdapterRequest) -> String {
    let canonical = serde_json::json!({
        "adapter_id": adapter_id,
        "prompt": request.prompt,
        "parameters": request.parameters,
        "context": request.context,
        "purpose": request.purpose,
        "language": request.language,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached response
#[derive(Debug, Clone)]
struct CacheEntry {
    response: ModelResponse,
    created_at: Instant,
    last_access: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit (0.0 when nothing was looked up)
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> Option<String> {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = &lru_key {
            self.entries.remove(key);
            self.stats.evictions += 1;
        }
        lru_key
    }

    fn drop_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let dropped = before - self.entries.len();
        self.stats.expirations += dropped as u64;
        dropped
    }
}

/// LRU + TTL response cache
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// Create a cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Whether the cache stores anything at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.max_size > 0
    }

    /// Look up `key`. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<ModelResponse> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let access = state.tick();

        match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now, ttl) => {
                entry.last_access = access;
                let response = entry.response.clone();
                state.stats.hits += 1;
                return Some(response);
            }
            Some(_) => {
                state.entries.remove(key);
                state.stats.expirations += 1;
                state.stats.misses += 1;
                tracing::debug!(key = %key, "Cache entry expired");
            }
            None => state.stats.misses += 1,
        }
        None
    }

    /// Insert or overwrite `key`, evicting least-recently-used entries when full
    pub fn set(&self, key: impl Into<String>, response: ModelResponse) {
        if !self.is_enabled() {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let access = state.tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            state.drop_expired(now, self.config.ttl());
            while state.entries.len() >= self.config.max_size {
                match state.evict_lru() {
                    Some(evicted) => tracing::debug!(key = %evicted, "Evicted LRU cache entry"),
                    None => break,
                }
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_access: access,
            },
        );
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        tracing::debug!("Response cache cleared");
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.state.lock().drop_expired(now, self.config.ttl())
    }

    /// Current number of entries, expired ones included until touched
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats
        }
    }
}
