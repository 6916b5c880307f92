//! Check decision caching with TTL and store-level invalidation.
//!
//! Keys come from [`check_cache_key`], so a decision cached by one request
//! is addressable by any other request with the same fingerprint, including
//! the deduplicated checks of a batch.
//!
//! Entries are stamped with the instant their resolution started, not the
//! instant they were stored, so a write racing the resolver marks them stale.
//!
//! # Cache Safety
//!
//! By default, caching is **disabled** (`enabled: false`). Cached positive
//! decisions can be served after tuple writes until the TTL expires or a
//! [`CacheController`] reports a newer write for the store.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchfga_domain::cache::{CheckCache, CheckCacheConfig};
//!
//! let cache = CheckCache::new(CheckCacheConfig::default().with_enabled(true));
//! cache.insert("store-1", key.clone(), response).await;
//! assert!(cache.get(&key).await.is_some());
//! ```

mod controller;
mod key;

pub use controller::{CacheController, NoopCacheController, StoreInvalidationController};
pub use key::{check_cache_key, CacheKey, CacheKeyError, CheckCacheKeyParams};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use tokio::time::Instant;

use crate::resolver::CheckResponse;

/// Configuration for the check cache.
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Whether caching is enabled. Defaults to `false`.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,
    /// Default TTL for cache entries.
    pub default_ttl: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 10_000,
            default_ttl: Duration::from_secs(10),
        }
    }
}

impl CheckCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// A cached decision, the store it belongs to and the time it is valid from.
#[derive(Debug, Clone)]
pub struct CachedCheck {
    pub store_id: Arc<str>,
    pub response: CheckResponse,
    /// When resolution of this decision started. Writes at or after this
    /// instant may not be reflected in `response`.
    pub inserted_at: Instant,
}

impl CachedCheck {
    /// Returns true if a write at `invalidated_at` may not be reflected in this entry.
    pub fn is_stale(&self, invalidated_at: Option<Instant>) -> bool {
        invalidated_at.is_some_and(|at| at >= self.inserted_at)
    }
}

/// Secondary index: store_id -> keys cached for that store.
type StoreIndex = DashMap<Arc<str>, HashSet<CacheKey>>;

/// Check decision cache.
///
/// Uses Moka's async cache for concurrent access with TTL eviction and a
/// store index so a whole store can be invalidated without scanning. The
/// index is pruned by Moka's eviction listener, so it never outlives the
/// entries it points at.
pub struct CheckCache {
    cache: Cache<CacheKey, CachedCheck>,
    config: CheckCacheConfig,
    by_store: Arc<StoreIndex>,
}

impl std::fmt::Debug for CheckCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .field("store_index_size", &self.by_store.len())
            .finish()
    }
}

impl CheckCache {
    pub fn new(config: CheckCacheConfig) -> Self {
        let by_store: Arc<StoreIndex> = Arc::new(DashMap::new());
        let index = by_store.clone();
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl)
            .eviction_listener(move |key: Arc<CacheKey>, entry: CachedCheck, cause| {
                // A replaced key is still cached under the same store.
                if !matches!(cause, RemovalCause::Replaced) {
                    unindex(&index, &entry.store_id, &key);
                }
            })
            .build();

        Self {
            cache,
            config,
            by_store,
        }
    }

    pub fn config(&self) -> &CheckCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Stores a decision for `key`, indexed under `store_id`, valid from now.
    pub async fn insert(&self, store_id: &str, key: CacheKey, response: CheckResponse) {
        self.insert_as_of(store_id, key, response, Instant::now()).await;
    }

    /// Stores a decision whose resolution started at `resolved_from`.
    ///
    /// Any store write at or after `resolved_from` makes the entry stale.
    pub async fn insert_as_of(
        &self,
        store_id: &str,
        key: CacheKey,
        response: CheckResponse,
        resolved_from: Instant,
    ) {
        let store_id: Arc<str> = Arc::from(store_id);
        self.by_store
            .entry(store_id.clone())
            .or_default()
            .insert(key.clone());

        let entry = CachedCheck {
            store_id,
            response,
            inserted_at: resolved_from,
        };
        self.cache.insert(key, entry).await;
    }

    /// Retrieves a cached decision, recording a hit or miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedCheck> {
        let result = self.cache.get(key).await;
        if result.is_some() {
            metrics::counter!("batchfga_cache_hits_total").increment(1);
        } else {
            metrics::counter!("batchfga_cache_misses_total").increment(1);
        }
        result
    }

    /// Removes a single entry.
    pub async fn invalidate(&self, store_id: &str, key: &CacheKey) {
        unindex(&self.by_store, store_id, key);
        self.cache.invalidate(key).await;
    }

    /// Removes every entry cached for a store.
    pub async fn invalidate_store(&self, store_id: &str) {
        // remove() takes the whole index entry so no concurrent insert is lost
        // between reading and clearing it.
        if let Some((_, keys)) = self.by_store.remove(store_id) {
            for key in &keys {
                self.cache.invalidate(key).await;
            }
        }
    }

    /// Returns the approximate number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Number of keys held by the store index.
    pub fn indexed_key_count(&self) -> usize {
        self.by_store.iter().map(|keys| keys.len()).sum()
    }

    /// Runs pending maintenance tasks (evictions). Useful for testing TTL behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

fn unindex(index: &StoreIndex, store_id: &str, key: &CacheKey) {
    if let Some(mut keys) = index.get_mut(store_id) {
        keys.remove(key);
    }
    index.remove_if(store_id, |_, keys| keys.is_empty());
}

/// Registers check cache metric descriptions.
pub fn register_check_cache_metrics() {
    metrics::describe_counter!(
        "batchfga_cache_hits_total",
        "Total number of check cache hits"
    );
    metrics::describe_counter!(
        "batchfga_cache_misses_total",
        "Total number of check cache misses"
    );
}
