//! Response caching (spec.md §4.3).
//!
//! Caching is keyed on the deterministic tuple `(taskType, systemPrompt,
//! userPrompt, schemaDescription)`, never on `principalId`/`userId`: two
//! tenants asking the identical question get the identical cached answer.
//! The default backend is in-memory ([`InMemoryCacheStore`], backed by
//! `moka`); [`CacheBackend`] lets the runtime crate swap in a distributed
//! store without touching callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::result::Usage;

/// Default cache entry lifetime, in milliseconds (one hour).
pub const DEFAULT_TTL_MS: u64 = 3_600_000;
/// Default maximum number of entries held by [`InMemoryCacheStore`].
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// A cached response: the serialised structured-output value plus the
/// usage recorded when it was first produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached structured-output value, as JSON.
    pub value: serde_json::Value,
    /// Usage recorded for the original, non-cached call.
    pub usage: Usage,
}

/// Point-in-time counters for a cache backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Entries currently stored (approximate for backends with async
    /// eviction, such as `moka`).
    pub entry_count: u64,
    /// Successful lookups since the backend was created.
    pub hits: u64,
    /// Unsuccessful lookups since the backend was created.
    pub misses: u64,
}

/// Storage behind the router's response cache. A distributed backend
/// (Redis, etc.) implements this trait in `router-runtime` to replace the
/// default in-memory store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up `key`. Implementations must record the lookup in their
    /// hit/miss counters.
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Insert `entry` under `key` with the given time-to-live.
    async fn set(&self, key: String, entry: CacheEntry, ttl_ms: u64);

    /// Remove `key`, if present.
    async fn delete(&self, key: &str);

    /// Remove every entry.
    async fn clear(&self);

    /// Current counters.
    fn stats(&self) -> CacheStats;
}

/// Derive the deterministic cache key for a task. `schema_description`
/// should be [`crate::schema::SchemaDescriptor::stable_description`].
#[must_use]
pub fn generate_key(
    task_type: &str,
    system_prompt: &str,
    user_prompt: &str,
    schema_description: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(system_prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(user_prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(schema_description.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The default in-memory cache backend, one `moka` cache per process.
///
/// Entries carry their own per-insert TTL (spec.md §4.3's per-task
/// `cacheTtlMs` override); `moka`'s `Expiry` hook enforces it so a short-TTL
/// entry doesn't linger just because the cache's overall capacity hasn't
/// been reached.
pub struct InMemoryCacheStore {
    cache: Cache<String, Arc<TimedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct TimedEntry {
    entry: CacheEntry,
    ttl: Duration,
}

impl moka::Expiry<String, Arc<TimedEntry>> for ExpiryByEntry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<TimedEntry>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

struct ExpiryByEntry;

impl InMemoryCacheStore {
    /// Build a store with the given entry cap and default TTL (used when a
    /// caller does not override `cacheTtlMs`).
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(ExpiryByEntry)
            .build();
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Run `moka`'s pending maintenance tasks, forcing size/TTL eviction to
    /// catch up synchronously. Primarily useful in tests.
    pub async fn reap_expired(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Some(timed) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(timed.entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: String, entry: CacheEntry, ttl_ms: u64) {
        let timed = Arc::new(TimedEntry {
            entry,
            ttl: Duration::from_millis(ttl_ms),
        });
        self.cache.insert(key, timed).await;
    }

    async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u32) -> CacheEntry {
        CacheEntry {
            value: serde_json::json!({ "n": n }),
            usage: Usage::default(),
        }
    }

    #[test]
    fn generate_key_is_deterministic() {
        let a = generate_key("agency.scope", "sys", "user", "schema");
        let b = generate_key("agency.scope", "sys", "user", "schema");
        assert_eq!(a, b);
    }

    #[test]
    fn generate_key_distinguishes_any_component() {
        let base = generate_key("agency.scope", "sys", "user", "schema");
        assert_ne!(base, generate_key("agency.other", "sys", "user", "schema"));
        assert_ne!(base, generate_key("agency.scope", "sys2", "user", "schema"));
        assert_ne!(base, generate_key("agency.scope", "sys", "user2", "schema"));
        assert_ne!(base, generate_key("agency.scope", "sys", "user", "schema2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_then_get_round_trips() {
        let store = InMemoryCacheStore::new(100);
        store.set("k".to_string(), entry(1), DEFAULT_TTL_MS).await;
        let got = store.get("k").await.expect("entry should be present");
        assert_eq!(got.value, serde_json::json!({ "n": 1 }));
        assert_eq!(store.stats().hits, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn miss_is_counted() {
        let store = InMemoryCacheStore::new(100);
        assert!(store.get("missing").await.is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_entry() {
        let store = InMemoryCacheStore::new(100);
        store.set("k".to_string(), entry(1), DEFAULT_TTL_MS).await;
        store.delete("k").await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_removes_everything() {
        let store = InMemoryCacheStore::new(100);
        store.set("a".to_string(), entry(1), DEFAULT_TTL_MS).await;
        store.set("b".to_string(), entry(2), DEFAULT_TTL_MS).await;
        store.clear().await;
        assert!(store.get("a").await.is_none());
        assert!(store.get("b").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn entries_expire_after_their_own_ttl() {
        let store = InMemoryCacheStore::new(100);
        store.set("short".to_string(), entry(1), 1_000).await;
        store.set("long".to_string(), entry(2), 60_000).await;

        tokio::time::advance(Duration::from_millis(2_000)).await;
        store.reap_expired().await;

        assert!(store.get("short").await.is_none());
        assert!(store.get("long").await.is_some());
    }
}
