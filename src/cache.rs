//! Count cache: remembers how many rows match a filter.
//!
//! Uses DashMap for concurrent access with per-key sharding, so paging
//! requests on different filters never contend on a global lock.
//!
//! # Freshness
//!
//! An entry younger than the staleness tolerance is served as is. An entry
//! whose age is greater than or equal to the tolerance is recomputed against
//! the store and replaced. A zero tolerance therefore recomputes on every
//! request.
//!
//! Entries are never evicted: one cache serves one entity type, and the
//! number of distinct filters is bounded by the application, not by input
//! volume. An entry is only ever replaced by a newer computation.

use crate::error::Result;
use crate::expression::Filter;
use crate::key::CountKey;
use crate::observability::{NoOpMetrics, QueryMetrics};
use crate::store::DataStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cached count with the time it was computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountAndDate {
    pub count: usize,
    pub computed_at: Instant,
}

impl CountAndDate {
    fn new(count: usize, computed_at: Instant) -> Self {
        CountAndDate { count, computed_at }
    }

    fn age(&self) -> Duration {
        self.computed_at.elapsed()
    }

    fn is_stale(&self, tolerance: Duration) -> bool {
        self.age() >= tolerance
    }
}

/// Thread-safe cache of total-row counts keyed by filter.
///
/// # Example
///
/// ```no_run
/// use crud_kit::cache::CountCache;
/// use crud_kit::expression::Filter;
/// use crud_kit::store::InMemoryStore;
/// use serde_json::json;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///     let cache = CountCache::new();
///
///     let filter = Filter::parse("Title.Contains(@0)", vec![json!("o")])?;
///     let total = cache
///         .get_count(&store, "movies", Some(&filter), Duration::from_secs(60))
///         .await?;
///     assert_eq!(total, 0);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CountCache {
    entries: Arc<DashMap<String, CountAndDate>>,
    metrics: Arc<dyn QueryMetrics>,
}

impl CountCache {
    /// Create a new empty count cache.
    pub fn new() -> Self {
        CountCache {
            entries: Arc::new(DashMap::new()),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn QueryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of rows in `table` matching `filter`, served from the cache
    /// while the cached value is younger than `staleness`.
    ///
    /// # Errors
    ///
    /// Propagates store and evaluation errors from the count query. A failed
    /// refresh leaves the previous entry in place.
    pub async fn get_count<S: DataStore>(
        &self,
        store: &S,
        table: &str,
        filter: Option<&Filter>,
        staleness: Duration,
    ) -> Result<usize> {
        let key = filter.map_or_else(|| CountKey::derive(None, &[]), Filter::cache_key);

        // copy out so no shard lock is held across the await below
        let cached = self.entries.get(&key).map(|entry| *entry);
        if let Some(entry) = cached {
            if !entry.is_stale(staleness) {
                self.metrics.record_count_hit(&key, entry.age());
                return Ok(entry.count);
            }
            debug!("Count for '{}' is stale ({:?}), recomputing", key, entry.age());
        }

        let timer = Instant::now();
        let count = store.count(table, filter).await?;
        self.store_entry(key.clone(), CountAndDate::new(count, Instant::now()));
        self.metrics.record_count_refresh(&key, timer.elapsed());

        Ok(count)
    }

    /// Atomically replace the entry for `key` unless a newer one is present.
    ///
    /// Two callers refreshing the same key concurrently both run the count;
    /// the later computation wins.
    fn store_entry(&self, key: String, fresh: CountAndDate) {
        self.entries
            .entry(key)
            .and_modify(|current| {
                if fresh.computed_at >= current.computed_at {
                    *current = fresh;
                }
            })
            .or_insert(fresh);
    }

    /// Cached entry for a filter key, if any.
    pub fn peek(&self, key: &str) -> Option<CountAndDate> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Number of cached filters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics relative to a staleness tolerance.
    pub fn stats(&self, staleness: Duration) -> CountCacheStats {
        let stale_entries = self
            .entries
            .iter()
            .filter(|entry| entry.is_stale(staleness))
            .count();

        CountCacheStats {
            total_entries: self.entries.len(),
            stale_entries,
        }
    }
}

impl Default for CountCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Count cache statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountCacheStats {
    pub total_entries: usize,
    pub stale_entries: usize,
}
