//! Unit of work: an explicit change set over one store.
//!
//! A `UnitOfWork` tracks entities of any type, remembers what happened to each
//! (`Added`, `Modified`, `Deleted`, `Unchanged`) and commits everything in one
//! atomic [`DataStore::commit`]. It is opened per request and dropped at the
//! end of it; unsaved changes are discarded on drop.
//!
//! Before committing, [`UnitOfWork::save`] stamps the current user on every
//! pending entry whose entity exposes the `HasSysUser` capability, whatever
//! its type.

use crate::cache::CountCache;
use crate::entity::{Entity, Tracked};
use crate::error::{Error, Result};
use crate::key::RowKey;
use crate::query::QueryPlan;
use crate::serialization;
use crate::store::{DataStore, RowChange};
use chrono::{DateTime, Utc};

/// State of one tracked entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

struct Entry {
    key: String,
    state: EntryState,
    entity: Box<dyn Tracked>,
}

/// Per-request persistence session.
pub struct UnitOfWork<S: DataStore> {
    store: S,
    counts: CountCache,
    user: Option<String>,
    entries: Vec<Entry>,
}

impl<S: DataStore> UnitOfWork<S> {
    /// Open a unit of work; `user` is stamped on audited entities at save.
    pub fn new(store: S, user: Option<String>) -> Self {
        UnitOfWork {
            store,
            counts: CountCache::new(),
            user,
            entries: Vec::new(),
        }
    }

    /// Share `counts` for queries run through this unit of work. It must be
    /// the cache that belongs to this unit of work's store.
    pub fn with_count_cache(mut self, counts: CountCache) -> Self {
        self.counts = counts;
        self
    }

    /// The store this unit of work commits to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Count cache paired with [`UnitOfWork::store`].
    pub fn count_cache(&self) -> &CountCache {
        &self.counts
    }

    /// User name stamped on audited entities.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Find an entity by primary key.
    ///
    /// Tracked entities are served from the unit of work (a pending delete
    /// reads as `None`); otherwise the row is loaded and attached unchanged.
    ///
    /// # Errors
    ///
    /// Propagates store and deserialization errors.
    pub async fn find<T: Entity>(&mut self, key: &T::Key) -> Result<Option<T>> {
        let row_key = RowKey::of::<T>(key)?;

        if let Some(entry) = self.entry(T::table_name(), &row_key) {
            if entry.state == EntryState::Deleted {
                return Ok(None);
            }
            return Ok(Some(downcast::<T>(entry)?));
        }

        let Some(row) = self.store.fetch(T::table_name(), &row_key).await? else {
            return Ok(None);
        };

        let entity: T = serialization::from_row(row.data)?;
        self.push(entity.clone(), row_key, EntryState::Unchanged);
        Ok(Some(entity))
    }

    /// Run a composed plan and materialize entities.
    ///
    /// Unless the plan is `no_tracking`, results are attached to this unit of
    /// work; rows already tracked come back in their tracked state.
    ///
    /// # Errors
    ///
    /// Propagates store, evaluation and deserialization errors.
    pub async fn query<T: Entity>(&mut self, plan: &QueryPlan) -> Result<Vec<T>> {
        let rows = self.store.query(T::table_name(), plan).await?;
        let mut entities = Vec::with_capacity(rows.len());

        for row in rows {
            let entity: T = serialization::from_row(row)?;
            if plan.no_tracking {
                entities.push(entity);
                continue;
            }

            let row_key = RowKey::of::<T>(&entity.key())?;
            match self.entry(T::table_name(), &row_key) {
                Some(entry) => entities.push(downcast::<T>(entry)?),
                None => {
                    self.push(entity.clone(), row_key, EntryState::Unchanged);
                    entities.push(entity);
                }
            }
        }

        Ok(entities)
    }

    /// Track a new entity for insertion.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` if the entity fails validation or its key is
    /// already tracked (and not pending deletion).
    pub fn add<T: Entity>(&mut self, entity: T) -> Result<()> {
        entity.validate()?;
        let row_key = RowKey::of::<T>(&entity.key())?;

        match self.position(T::table_name(), &row_key) {
            Some(index) if self.entries[index].state == EntryState::Deleted => {
                // delete followed by add of the same key is a replace
                self.entries[index].entity = Box::new(entity);
                self.entries[index].state = EntryState::Modified;
                Ok(())
            }
            Some(_) => Err(Error::ValidationError(format!(
                "'{}' with key {} is already tracked",
                T::table_name(),
                row_key
            ))),
            None => {
                self.push(entity, row_key, EntryState::Added);
                Ok(())
            }
        }
    }

    /// Replace a tracked entity with `entity` (all fields) and mark it
    /// modified. An untracked entity is attached as modified.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` if the entity fails validation or is pending
    /// deletion.
    pub fn update<T: Entity>(&mut self, entity: T) -> Result<()> {
        entity.validate()?;
        let row_key = RowKey::of::<T>(&entity.key())?;

        match self.position(T::table_name(), &row_key) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.state = match entry.state {
                    EntryState::Deleted => {
                        return Err(Error::ValidationError(format!(
                            "'{}' with key {} is pending deletion",
                            T::table_name(),
                            row_key
                        )))
                    }
                    EntryState::Added => EntryState::Added,
                    EntryState::Unchanged | EntryState::Modified => EntryState::Modified,
                };
                entry.entity = Box::new(entity);
            }
            None => self.push(entity, row_key, EntryState::Modified),
        }

        Ok(())
    }

    /// Mark an entity for deletion. Removing a not-yet-saved entity simply
    /// forgets it.
    ///
    /// # Errors
    ///
    /// Propagates key serialization errors.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let row_key = RowKey::of::<T>(&entity.key())?;

        match self.position(T::table_name(), &row_key) {
            Some(index) if self.entries[index].state == EntryState::Added => {
                self.entries.remove(index);
            }
            Some(index) => {
                self.entries[index].entity = Box::new(entity.clone());
                self.entries[index].state = EntryState::Deleted;
            }
            None => self.push(entity.clone(), row_key, EntryState::Deleted),
        }

        Ok(())
    }

    /// State of a tracked entity, if tracked.
    pub fn state_of<T: Entity>(&self, key: &T::Key) -> Result<Option<EntryState>> {
        let row_key = RowKey::of::<T>(key)?;
        Ok(self.entry(T::table_name(), &row_key).map(|e| e.state))
    }

    /// Number of tracked entries, including unchanged ones.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries with pending changes.
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state != EntryState::Unchanged)
            .count()
    }

    /// Commit all pending changes in one atomic store call.
    ///
    /// Returns the number of rows written and the commit timestamp, or
    /// `None` when nothing was pending. On error nothing is applied and the
    /// pending entries stay as they were.
    ///
    /// # Errors
    ///
    /// `Error::PersistenceError` from the store, or serialization errors.
    pub async fn save(&mut self) -> Result<Option<(usize, DateTime<Utc>)>> {
        if self.pending() == 0 {
            return Ok(None);
        }

        self.stamp_audit_user();

        let mut changes = Vec::with_capacity(self.pending());
        for entry in &self.entries {
            let change = match entry.state {
                EntryState::Unchanged => continue,
                EntryState::Added => RowChange::Insert {
                    table: entry.entity.table(),
                    key: entry.entity.row_key()?,
                    data: entry.entity.to_row()?,
                },
                EntryState::Modified => RowChange::Update {
                    table: entry.entity.table(),
                    key: entry.entity.row_key()?,
                    data: entry.entity.to_row()?,
                },
                EntryState::Deleted => RowChange::Delete {
                    table: entry.entity.table(),
                    key: entry.key.clone(),
                },
            };
            changes.push(change);
        }

        let written = changes.len();
        let at = self.store.commit(changes).await?;

        self.entries.retain(|e| e.state != EntryState::Deleted);
        for entry in &mut self.entries {
            entry.state = EntryState::Unchanged;
        }

        debug!("Unit of work saved {} changes at {}", written, at);
        Ok(Some((written, at)))
    }

    /// Stamp the current user on every pending entry that carries the
    /// audit capability, across all entity types in this unit of work.
    fn stamp_audit_user(&mut self) {
        let Some(user) = self.user.as_deref() else {
            return;
        };

        for entry in &mut self.entries {
            if entry.state == EntryState::Unchanged {
                continue;
            }
            if let Some(audited) = entry.entity.sys_user_mut() {
                audited.set_sys_user(user);
            }
        }
    }

    fn push<T: Entity>(&mut self, entity: T, key: String, state: EntryState) {
        self.entries.push(Entry {
            key,
            state,
            entity: Box::new(entity),
        });
    }

    fn position(&self, table: &str, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.entity.table() == table && e.key == key)
    }

    fn entry(&self, table: &str, key: &str) -> Option<&Entry> {
        self.position(table, key).map(|index| &self.entries[index])
    }
}

impl<S: DataStore> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        let pending = self.pending();
        if pending > 0 {
            warn!("⚠ Unit of work dropped with {} unsaved changes", pending);
        }
    }
}

fn downcast<T: Entity>(entry: &Entry) -> Result<T> {
    entry
        .entity
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| {
            Error::Other(format!(
                "tracked entry {}/{} is not a {}",
                entry.entity.table(),
                entry.key,
                std::any::type_name::<T>()
            ))
        })
}
