//! In-memory data store (thread-safe, async).

use super::{DataStore, RowChange, StoredRow};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Table {
    rows: BTreeMap<String, StoredRow>,
    identity: i64,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    last_commit: Option<DateTime<Utc>>,
}

impl State {
    /// Strictly increasing commit clock.
    fn next_commit_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_commit {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_commit = Some(at);
        at
    }

    fn validate(&self, changes: &[RowChange]) -> Result<()> {
        // keys inserted or deleted earlier in the same commit
        let mut pending: HashMap<(&str, &str), bool> = HashMap::new();

        for change in changes {
            let slot = (change.table(), change.key());
            let exists = pending.get(&slot).copied().unwrap_or_else(|| {
                self.tables
                    .get(change.table())
                    .is_some_and(|t| t.rows.contains_key(change.key()))
            });

            match change {
                RowChange::Insert { table, key, .. } if exists => {
                    return Err(Error::PersistenceError(format!(
                        "duplicate key '{}' in table '{}'",
                        key, table
                    )));
                }
                RowChange::Update { table, key, .. } | RowChange::Delete { table, key }
                    if !exists =>
                {
                    return Err(Error::PersistenceError(format!(
                        "concurrency conflict: row '{}' in table '{}' no longer exists",
                        key, table
                    )));
                }
                RowChange::Delete { .. } => {
                    pending.insert(slot, false);
                }
                _ => {
                    pending.insert(slot, true);
                }
            }
        }

        Ok(())
    }
}

/// Thread-safe async in-memory data store.
///
/// All tables live behind one `RwLock`, so a commit is atomic across tables.
/// Clones share the same data; use [`InMemoryStore::new`] for an isolated
/// store (for example when switching a service into test mode).
///
/// # Example
///
/// ```no_run
/// use crud_kit::store::{DataStore, InMemoryStore, RowChange};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store
///         .commit(vec![RowChange::Insert {
///             table: "movies",
///             key: "1".to_string(),
///             data: json!({"Id": 1, "Title": "Up"}),
///         }])
///         .await?;
///
///     assert!(store.fetch("movies", "1").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        InMemoryStore {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Number of rows in a table.
    pub async fn len(&self, table: &str) -> usize {
        self.state
            .read()
            .await
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Check if a table is empty.
    pub async fn is_empty(&self, table: &str) -> bool {
        self.len(table).await == 0
    }

    /// Store statistics.
    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        StoreStats {
            tables: state.tables.len(),
            total_rows: state.tables.values().map(|t| t.rows.len()).sum(),
            last_commit: state.last_commit,
        }
    }

    /// Print store statistics to debug log.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        debug!(
            "Store Stats: {} tables, {} rows, last commit {:?}",
            stats.tables, stats.total_rows, stats.last_commit
        );
    }
}

impl DataStore for InMemoryStore {
    async fn fetch(&self, table: &str, key: &str) -> Result<Option<StoredRow>> {
        let state = self.state.read().await;
        let row = state
            .tables
            .get(table)
            .and_then(|t| t.rows.get(key))
            .cloned();

        debug!(
            "InMemory FETCH {}/{} -> {}",
            table,
            key,
            if row.is_some() { "HIT" } else { "MISS" }
        );
        Ok(row)
    }

    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn next_identity(&self, table: &str) -> Result<i64> {
        let mut state = self.state.write().await;
        let table = state.tables.entry(table.to_string()).or_default();
        table.identity += 1;
        Ok(table.identity)
    }

    async fn commit(&self, changes: Vec<RowChange>) -> Result<DateTime<Utc>> {
        let mut state = self.state.write().await;
        state.validate(&changes)?;

        let at = state.next_commit_time();
        let written = changes.len();

        for change in changes {
            match change {
                RowChange::Insert { table, key, data } | RowChange::Update { table, key, data } => {
                    let table = state.tables.entry(table.to_string()).or_default();
                    // explicit integer keys move the identity sequence past them
                    if let Ok(id) = key.parse::<i64>() {
                        table.identity = table.identity.max(id);
                    }
                    table.rows.insert(
                        key,
                        StoredRow {
                            data,
                            sys_start: at,
                        },
                    );
                }
                RowChange::Delete { table, key } => {
                    if let Some(table) = state.tables.get_mut(table) {
                        table.rows.remove(&key);
                    }
                }
            }
        }

        debug!("InMemory COMMIT {} changes at {}", written, at);
        Ok(at)
    }

    async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.last_commit)
    }
}

/// Store statistics.
#[derive(Clone, Debug)]
pub struct StoreStats {
    pub tables: usize,
    pub total_rows: usize,
    pub last_commit: Option<DateTime<Utc>>,
}
