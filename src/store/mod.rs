//! Data store abstraction: the queryable data source and persistence session
//! the CRUD core runs against.
//!
//! Rows are JSON objects grouped into tables. Every committed row carries a
//! `sys_start` watermark (its commit timestamp), which is what
//! [`DataStore::modified_since`] compares against.
//!
//! Implement [`DataStore`] for a real database; [`InMemoryStore`] is the
//! reference implementation used by tests and by the service's test mode.

use crate::error::Result;
use crate::expression::Filter;
use crate::query::QueryPlan;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub mod inmemory;

pub use inmemory::InMemoryStore;

/// A row as stored, with its watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub data: Value,
    pub sys_start: DateTime<Utc>,
}

/// One change within a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert {
        table: &'static str,
        key: String,
        data: Value,
    },
    Update {
        table: &'static str,
        key: String,
        data: Value,
    },
    Delete {
        table: &'static str,
        key: String,
    },
}

impl RowChange {
    pub fn table(&self) -> &'static str {
        match self {
            RowChange::Insert { table, .. }
            | RowChange::Update { table, .. }
            | RowChange::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            RowChange::Insert { key, .. }
            | RowChange::Update { key, .. }
            | RowChange::Delete { key, .. } => key,
        }
    }
}

/// Trait for data store implementations.
///
/// **IMPORTANT:** All methods use `&self`; implementations use interior
/// mutability or external storage. A store is cheap to clone and clones share
/// the same data.
///
/// **ASYNC:** All methods are async and may suspend on I/O. Cancellation and
/// timeouts are the implementation's concern.
#[allow(async_fn_in_trait)]
pub trait DataStore: Send + Sync + Clone {
    /// Fetch one row by key.
    ///
    /// # Returns
    /// - `Ok(Some(row))` - Row found
    /// - `Ok(None)` - No such key (not an error)
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn fetch(&self, table: &str, key: &str) -> Result<Option<StoredRow>>;

    /// Full scan of a table, in key order.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>>;

    /// Next value of the table's identity sequence.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn next_identity(&self, table: &str) -> Result<i64>;

    /// Apply all changes atomically and return the commit timestamp.
    ///
    /// Either every change is applied or none is. Each written row receives
    /// the commit timestamp as its `sys_start`; timestamps are strictly
    /// increasing across commits of one store.
    ///
    /// # Errors
    /// Returns `Error::PersistenceError` for a duplicate key on insert or a
    /// missing key on update/delete
    async fn commit(&self, changes: Vec<RowChange>) -> Result<DateTime<Utc>>;

    /// Timestamp of the most recent commit, if any.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>>;

    /// Count rows matching `filter` (all rows when `None`).
    ///
    /// Default implementation scans the table. Override to push the count
    /// down (e.g. SQL `COUNT(*)`).
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the filter fails to evaluate
    async fn count(&self, table: &str, filter: Option<&Filter>) -> Result<usize> {
        let rows = self.rows(table).await?;
        match filter {
            None => Ok(rows.len()),
            Some(filter) => {
                let mut count = 0;
                for row in &rows {
                    if filter.matches(&row.data)? {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    /// Execute a composed query plan.
    ///
    /// Default implementation scans the table and applies the plan in memory.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or an expression fails to evaluate
    async fn query(&self, table: &str, plan: &QueryPlan) -> Result<Vec<Value>> {
        let rows = self.rows(table).await?;
        plan.execute(rows.into_iter().map(|row| row.data).collect())
    }

    /// Rows whose watermark is strictly greater than `as_of`, oldest first.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable
    async fn modified_since(&self, table: &str, as_of: DateTime<Utc>) -> Result<Vec<StoredRow>> {
        let mut rows: Vec<StoredRow> = self
            .rows(table)
            .await?
            .into_iter()
            .filter(|row| row.sys_start > as_of)
            .collect();
        rows.sort_by_key(|row| row.sys_start);
        Ok(rows)
    }

    /// Health check - verify the store is accessible.
    ///
    /// # Errors
    /// Returns `Err` if the store is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
