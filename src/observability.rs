//! Observability hooks and count staleness policies.
//!
//! # Metrics
//!
//! Implement [`QueryMetrics`] to feed your monitoring system:
//!
//! ```ignore
//! use crud_kit::observability::QueryMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl QueryMetrics for PrometheusMetrics {
//!     fn record_count_hit(&self, _key: &str, _age: Duration) {
//!         // counter!("count_cache_hits").inc();
//!     }
//! }
//! ```
//!
//! The default methods log through the `log` crate; [`NoOpMetrics`] is silent.
//!
//! # Staleness
//!
//! A cached count older than its staleness tolerance is recomputed on the
//! next request:
//!
//! ```
//! use crud_kit::observability::StalenessPolicy;
//! use std::time::Duration;
//!
//! let _policy = StalenessPolicy::Fixed(Duration::from_secs(30));
//!
//! let _policy = StalenessPolicy::PerType(|table| match table {
//!     "audit_log" => Duration::from_secs(5),
//!     _ => Duration::from_secs(120),
//! });
//! ```

use std::time::Duration;

/// Staleness tolerance used when nothing else is configured.
pub const DEFAULT_COUNT_STALENESS: Duration = Duration::from_secs(60);

/// Trait for query and count-cache metrics collection.
pub trait QueryMetrics: Send + Sync {
    /// A count was served from the cache.
    fn record_count_hit(&self, key: &str, age: Duration) {
        debug!("Count HIT: '{}' (age {:?})", key, age);
    }

    /// A count was (re)computed against the store.
    fn record_count_refresh(&self, key: &str, duration: Duration) {
        debug!("Count REFRESH: '{}' took {:?}", key, duration);
    }

    /// A query was composed and executed.
    fn record_query(&self, table: &str, rows: usize, duration: Duration) {
        debug!("Query {}: {} rows in {:?}", table, rows, duration);
    }

    /// An operation failed.
    fn record_error(&self, table: &str, error: &str) {
        warn!("Query ERROR on {}: {}", table, error);
    }
}

/// Silent metrics implementation.
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl QueryMetrics for NoOpMetrics {
    fn record_count_hit(&self, _key: &str, _age: Duration) {}
    fn record_count_refresh(&self, _key: &str, _duration: Duration) {}
    fn record_query(&self, _table: &str, _rows: usize, _duration: Duration) {}
    fn record_error(&self, _table: &str, _error: &str) {}
}

/// Metrics implementation that only logs (the trait defaults).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl QueryMetrics for LogMetrics {}

/// How long a cached count stays fresh.
#[derive(Clone, Debug, Default)]
pub enum StalenessPolicy {
    /// [`DEFAULT_COUNT_STALENESS`] for every table
    #[default]
    Default,

    /// Fixed duration for every table
    Fixed(Duration),

    /// Custom per-table policy
    PerType(fn(&str) -> Duration),
}

impl StalenessPolicy {
    /// Staleness tolerance for a table.
    pub fn tolerance(&self, table: &str) -> Duration {
        match self {
            StalenessPolicy::Default => DEFAULT_COUNT_STALENESS,
            StalenessPolicy::Fixed(d) => *d,
            StalenessPolicy::PerType(f) => f(table),
        }
    }
}
