//! CRUD service facade.
//!
//! The single entry point application layers call for persistence: it wires
//! audit stamping, lifecycle hooks and identity assignment, and delegates
//! querying to the [`QueryBuilder`].

use crate::cache::{CountCache, CountCacheStats};
use crate::config::ServiceConfig;
use crate::entity::{Entity, HasIntegerId};
use crate::error::{Error, Result};
use crate::hooks::{NoHooks, ServiceHooks};
use crate::identity::{Anonymous, IdentityProvider};
use crate::observability::{LogMetrics, QueryMetrics};
use crate::query::{QueryBuilder, QueryPlan, QueryRequest, QueryResult};
use crate::serialization;
use crate::session::UnitOfWork;
use crate::store::DataStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store and count cache in use; swapped as one by `reset_to_test_mode`.
struct Backing<S> {
    store: S,
    counts: CountCache,
}

/// CRUD service for one entity type.
///
/// Cheap to clone: clones share the store, the count cache and the hooks.
///
/// # Example
///
/// ```ignore
/// use crud_kit::{CrudService, QueryRequest, CountMode, StaticIdentity};
/// use crud_kit::store::InMemoryStore;
///
/// let movies: CrudService<Movie, _> = CrudService::new(InMemoryStore::new())
///     .with_identity(StaticIdentity::new("alice"));
///
/// let created = movies.create(Movie::new("Rio Bravo")).await?;
///
/// let page = movies
///     .get(&QueryRequest::new()
///         .with_filter("Title.Contains(@0)", vec![json!("o")])
///         .with_order_by("ReleaseDate desc")
///         .with_skip(3)
///         .with_take(4)
///         .with_count_mode(CountMode::Count))
///     .await?;
/// println!("{} of {}", page.rows().len(), page.count.unwrap_or_default());
/// ```
pub struct CrudService<T, S, H = NoHooks> {
    state: Arc<RwLock<Arc<Backing<S>>>>,
    hooks: Arc<H>,
    identity: Arc<dyn IdentityProvider>,
    metrics: Arc<dyn QueryMetrics>,
    config: Arc<ServiceConfig>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S, H> Clone for CrudService<T, S, H> {
    fn clone(&self) -> Self {
        CrudService {
            state: Arc::clone(&self.state),
            hooks: Arc::clone(&self.hooks),
            identity: Arc::clone(&self.identity),
            metrics: Arc::clone(&self.metrics),
            config: Arc::clone(&self.config),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: DataStore> CrudService<T, S, NoHooks> {
    /// Create a service over `store` with log-based metrics.
    pub fn new(store: S) -> Self {
        Self::with_metrics(store, Arc::new(LogMetrics))
    }

    /// Create a service with custom metrics.
    pub fn with_metrics(store: S, metrics: Arc<dyn QueryMetrics>) -> Self {
        CrudService {
            state: Arc::new(RwLock::new(Arc::new(Backing {
                store,
                counts: CountCache::new().with_metrics(Arc::clone(&metrics)),
            }))),
            hooks: Arc::new(NoHooks),
            identity: Arc::new(Anonymous),
            metrics,
            config: Arc::new(ServiceConfig::default()),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: DataStore, H: ServiceHooks<T>> CrudService<T, S, H> {
    /// Install lifecycle hooks.
    pub fn with_hooks<H2: ServiceHooks<T>>(self, hooks: H2) -> CrudService<T, S, H2> {
        CrudService {
            state: self.state,
            hooks: Arc::new(hooks),
            identity: self.identity,
            metrics: self.metrics,
            config: self.config,
            _entity: PhantomData,
        }
    }

    /// Set the source of the audit user.
    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    async fn backing(&self) -> Arc<Backing<S>> {
        Arc::clone(&*self.state.read().await)
    }

    fn table() -> &'static str {
        T::table_name()
    }

    fn observe<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            self.metrics.record_error(Self::table(), &e.to_string());
        }
        result
    }

    /// Open a unit of work on the current store, stamped with the current
    /// user. Unsaved changes are discarded when it is dropped.
    pub async fn begin(&self) -> UnitOfWork<S> {
        let backing = self.backing().await;
        UnitOfWork::new(backing.store.clone(), self.identity.current_user())
            .with_count_cache(backing.counts.clone())
    }

    /// Persist a new entity.
    ///
    /// Assigns a fresh `SysGuid` when the entity carries a nil one and draws
    /// an integer key from the store when the entity's id is `0`. Returns the
    /// entity as committed, audit fields and generated keys included.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: entity validation failed
    /// - `Error::PersistenceError`: duplicate key or store failure
    /// - any error returned by a hook
    pub async fn create(&self, entity: T) -> Result<T> {
        let result = self.create_inner(entity).await;
        self.observe(result)
    }

    async fn create_inner(&self, mut entity: T) -> Result<T> {
        if let Some(guid) = entity.as_sys_guid_mut() {
            if guid.sys_guid().is_nil() {
                guid.set_sys_guid(Uuid::new_v4());
            }
        }

        let needs_identity = entity
            .as_integer_id_mut()
            .is_some_and(|entity| entity.id() == 0);
        if needs_identity {
            let id = self.backing().await.store.next_identity(Self::table()).await?;
            if let Some(entity) = entity.as_integer_id_mut() {
                entity.set_id(id);
            }
        }

        let mut uow = self.begin().await;
        self.hooks.before_create(&mut uow, &mut entity).await?;

        let key = entity.key();
        uow.add(entity)?;
        uow.save().await?;
        let created = tracked_copy(&mut uow, &key).await?;

        self.hooks.after_create(&created).await?;
        info!("✓ Created {} {:?}", Self::table(), key);
        Ok(created)
    }

    /// Replace the record stored under `key` with `entity` (all fields).
    ///
    /// Returns `Ok(None)` when no record has that key. The stored `SysGuid`
    /// is kept whatever `entity` carries.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: `entity` has a different key than `key`,
    ///   or failed validation
    /// - `Error::PersistenceError`: the record vanished before commit
    /// - any error returned by a hook
    pub async fn update(&self, key: &T::Key, entity: T) -> Result<Option<T>> {
        let result = self.update_inner(key, entity).await;
        self.observe(result)
    }

    async fn update_inner(&self, key: &T::Key, mut entity: T) -> Result<Option<T>> {
        if entity.key() != *key {
            return Err(Error::ValidationError(format!(
                "cannot change the key of {} {:?} to {:?}",
                Self::table(),
                key,
                entity.key()
            )));
        }

        let mut uow = self.begin().await;
        let Some(existing) = uow.find::<T>(key).await? else {
            debug!("Update of {} {:?}: not found", Self::table(), key);
            return Ok(None);
        };

        if let (Some(stored), Some(incoming)) = (existing.as_sys_guid(), entity.as_sys_guid_mut())
        {
            incoming.set_sys_guid(stored.sys_guid());
        }

        self.hooks.before_update(&mut uow, &mut entity).await?;
        uow.update(entity)?;
        uow.save().await?;
        let updated = tracked_copy(&mut uow, key).await?;

        self.hooks.after_update(&updated).await?;
        info!("✓ Updated {} {:?}", Self::table(), key);
        Ok(Some(updated))
    }

    /// Remove the record stored under `key`, returning its prior state.
    ///
    /// Returns `Ok(None)` when no record has that key. Changes staged by the
    /// `before_delete` hook are committed together with the removal.
    ///
    /// # Errors
    ///
    /// - `Error::PersistenceError`: the record vanished before commit
    /// - any error returned by a hook
    pub async fn delete(&self, key: &T::Key) -> Result<Option<T>> {
        let result = self.delete_inner(key).await;
        self.observe(result)
    }

    async fn delete_inner(&self, key: &T::Key) -> Result<Option<T>> {
        let mut uow = self.begin().await;
        let Some(existing) = uow.find::<T>(key).await? else {
            debug!("Delete of {} {:?}: not found", Self::table(), key);
            return Ok(None);
        };

        self.hooks.before_delete(&mut uow, &existing).await?;
        uow.remove(&existing)?;
        uow.save().await?;

        self.hooks.after_delete(&existing).await?;
        info!("✓ Deleted {} {:?}", Self::table(), key);
        Ok(Some(existing))
    }

    /// Find a record by primary key.
    ///
    /// # Errors
    ///
    /// Propagates store and deserialization errors.
    pub async fn find(&self, key: &T::Key) -> Result<Option<T>> {
        let mut uow = self.begin().await;
        let result = uow.find::<T>(key).await;
        self.observe(result)
    }

    /// Run a query and materialize full entities.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: the request carries a `select`
    ///   (use [`CrudService::get_projected`])
    /// - `Error::QueryError` / `Error::EvaluationError`: bad expression
    /// - `Error::PersistenceError`: store failure
    pub async fn get(&self, request: &QueryRequest) -> Result<QueryResult<T>> {
        let mut uow = self.begin().await;
        self.get_with(&mut uow, request).await
    }

    /// Like [`CrudService::get`], attaching results to an existing unit of
    /// work unless the request is `no_tracking`.
    ///
    /// Reads and counts go through the unit of work's own store and count
    /// cache, so a unit of work opened before `reset_to_test_mode` never
    /// touches the isolated store's cache.
    ///
    /// # Errors
    ///
    /// Same as [`CrudService::get`].
    pub async fn get_with(
        &self,
        uow: &mut UnitOfWork<S>,
        request: &QueryRequest,
    ) -> Result<QueryResult<T>> {
        let result = self.get_inner(uow, request).await;
        self.observe(result)
    }

    async fn get_inner(
        &self,
        uow: &mut UnitOfWork<S>,
        request: &QueryRequest,
    ) -> Result<QueryResult<T>> {
        if request.select.is_some() {
            return Err(Error::ValidationError(
                "projected requests must go through get_projected".to_string(),
            ));
        }

        let timer = Instant::now();
        // counts go to the cache of the store the unit of work reads from
        let counts = uow.count_cache().clone();
        let store = uow.store().clone();
        let builder = QueryBuilder::new(&store, &counts, self.config.staleness_for(Self::table()));
        let composed = builder.build(Self::table(), request).await?;

        let data = match &composed.plan {
            None => None,
            Some(plan) => Some(uow.query::<T>(plan).await?),
        };

        let rows = data.as_ref().map_or(0, Vec::len);
        self.metrics.record_query(Self::table(), rows, timer.elapsed());
        Ok(QueryResult {
            data,
            count: composed.count,
        })
    }

    /// Run a query and return loosely typed projected records.
    ///
    /// Without a `select` the raw rows are returned. The projection is
    /// applied after the count and skipped for count-only requests.
    ///
    /// # Errors
    ///
    /// - `Error::QueryError` / `Error::EvaluationError`: bad expression
    /// - `Error::PersistenceError`: store failure
    pub async fn get_projected(&self, request: &QueryRequest) -> Result<QueryResult<Value>> {
        let result = self.get_projected_inner(request).await;
        self.observe(result)
    }

    async fn get_projected_inner(&self, request: &QueryRequest) -> Result<QueryResult<Value>> {
        let timer = Instant::now();
        let backing = self.backing().await;
        let builder = QueryBuilder::new(
            &backing.store,
            &backing.counts,
            self.config.staleness_for(Self::table()),
        );
        let composed = builder.build(Self::table(), request).await?;

        let data = match &composed.plan {
            None => None,
            Some(plan) => {
                let rows = backing.store.query(Self::table(), plan).await?;
                Some(match &composed.projection {
                    None => rows,
                    Some(projection) => rows
                        .iter()
                        .map(|row| projection.apply(row))
                        .collect::<Result<Vec<_>>>()?,
                })
            }
        };

        let rows = data.as_ref().map_or(0, Vec::len);
        self.metrics.record_query(Self::table(), rows, timer.elapsed());
        Ok(QueryResult {
            data,
            count: composed.count,
        })
    }

    /// Records whose watermark is strictly after `as_of`, oldest first.
    ///
    /// Capture [`CrudService::high_water_mark`] before an operation and pass
    /// it here afterwards to see exactly the rows that operation wrote.
    /// Deleted rows are gone and never show up.
    ///
    /// # Errors
    ///
    /// Propagates store and deserialization errors.
    pub async fn get_modified(&self, as_of: DateTime<Utc>) -> Result<Vec<T>> {
        let backing = self.backing().await;
        let result = async {
            backing
                .store
                .modified_since(Self::table(), as_of)
                .await?
                .into_iter()
                .map(|row| serialization::from_row(row.data))
                .collect::<Result<Vec<T>>>()
        }
        .await;
        self.observe(result)
    }

    /// Timestamp of the latest commit, or the minimum timestamp for a store
    /// that has never been written.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn high_water_mark(&self) -> Result<DateTime<Utc>> {
        let mark = self.backing().await.store.watermark().await?;
        Ok(mark.unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Swap the store for an isolated one (for example a fresh
    /// `InMemoryStore`) and start over with an empty count cache.
    ///
    /// Units of work opened before the swap keep their old store and old
    /// count cache.
    pub async fn reset_to_test_mode(&self, store: S) {
        let mut state = self.state.write().await;
        *state = Arc::new(Backing {
            store,
            counts: CountCache::new().with_metrics(Arc::clone(&self.metrics)),
        });
        warn!("⚠ {} service switched to an isolated test store", Self::table());
    }

    /// Count cache statistics against this table's staleness tolerance.
    pub async fn count_cache_stats(&self) -> CountCacheStats {
        let staleness = self.config.staleness_for(Self::table());
        self.backing().await.counts.stats(staleness)
    }

    /// Check that the current store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the store is not accessible.
    pub async fn health_check(&self) -> Result<bool> {
        self.backing().await.store.health_check().await
    }
}

impl<T, S, H> CrudService<T, S, H>
where
    T: Entity + HasIntegerId,
    S: DataStore,
    H: ServiceHooks<T>,
{
    /// Every integer key in the table, ascending. Debug utility.
    ///
    /// # Errors
    ///
    /// Propagates store and deserialization errors.
    pub async fn all_ids(&self) -> Result<Vec<i64>> {
        let plan = QueryPlan {
            no_tracking: true,
            ..QueryPlan::default()
        };
        let mut uow = self.begin().await;
        let mut ids: Vec<i64> = uow
            .query::<T>(&plan)
            .await?
            .iter()
            .map(HasIntegerId::id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Committed state of a just-saved entity, as held by the unit of work.
async fn tracked_copy<T: Entity, S: DataStore>(
    uow: &mut UnitOfWork<S>,
    key: &T::Key,
) -> Result<T> {
    uow.find::<T>(key).await?.ok_or_else(|| {
        Error::Other(format!(
            "{} {:?} missing from its unit of work after save",
            T::table_name(),
            key
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{HasSysGuid, HasSysUser};
    use crate::identity::StaticIdentity;
    use crate::query::CountMode;
    use crate::store::InMemoryStore;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Person {
        id: i64,
        sys_guid: Uuid,
        name: String,
        sys_user: Option<String>,
    }

    impl HasSysUser for Person {
        fn sys_user(&self) -> Option<&str> {
            self.sys_user.as_deref()
        }

        fn set_sys_user(&mut self, user: &str) {
            self.sys_user = Some(user.to_string());
        }
    }

    impl HasSysGuid for Person {
        fn sys_guid(&self) -> Uuid {
            self.sys_guid
        }

        fn set_sys_guid(&mut self, guid: Uuid) {
            self.sys_guid = guid;
        }
    }

    impl HasIntegerId for Person {
        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    impl Entity for Person {
        type Key = i64;

        fn key(&self) -> Self::Key {
            self.id
        }

        fn table_name() -> &'static str {
            "people"
        }

        fn as_sys_user_mut(&mut self) -> Option<&mut dyn HasSysUser> {
            Some(self)
        }

        fn as_sys_guid(&self) -> Option<&dyn HasSysGuid> {
            Some(self)
        }

        fn as_sys_guid_mut(&mut self) -> Option<&mut dyn HasSysGuid> {
            Some(self)
        }

        fn as_integer_id_mut(&mut self) -> Option<&mut dyn HasIntegerId> {
            Some(self)
        }
    }

    fn person(name: &str) -> Person {
        Person {
            id: 0,
            sys_guid: Uuid::nil(),
            name: name.to_string(),
            sys_user: None,
        }
    }

    fn service() -> CrudService<Person, InMemoryStore> {
        CrudService::new(InMemoryStore::new()).with_identity(StaticIdentity::new("tester"))
    }

    #[tokio::test]
    async fn test_create_assigns_identity_guid_and_user() {
        let people = service();

        let ann = people.create(person("Ann")).await.unwrap();
        let ben = people.create(person("Ben")).await.unwrap();

        assert_eq!((ann.id, ben.id), (1, 2));
        assert!(!ann.sys_guid.is_nil());
        assert_ne!(ann.sys_guid, ben.sys_guid);
        assert_eq!(ann.sys_user.as_deref(), Some("tester"));
        assert_eq!(people.find(&1).await.unwrap(), Some(ann));
    }

    #[tokio::test]
    async fn test_create_keeps_explicit_guid() {
        let people = service();
        let guid = Uuid::new_v4();

        let mut p = person("Ann");
        p.sys_guid = guid;
        assert_eq!(people.create(p).await.unwrap().sys_guid, guid);
    }

    #[tokio::test]
    async fn test_update_replaces_fields_but_not_guid() {
        let people = service();
        let ann = people.create(person("Ann")).await.unwrap();

        let mut edited = person("Anne");
        edited.id = ann.id;
        edited.sys_guid = Uuid::new_v4();

        let updated = people.update(&ann.id, edited).await.unwrap().unwrap();
        assert_eq!(updated.name, "Anne");
        assert_eq!(updated.sys_guid, ann.sys_guid);
    }

    /// Stages an extra person from every `before_*` hook and counts calls.
    #[derive(Default)]
    struct StagingHooks {
        calls: AtomicUsize,
    }

    impl StagingHooks {
        fn stage<S: DataStore>(&self, uow: &mut UnitOfWork<S>) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
            let mut staged = person("Staged");
            staged.id = 1000 + n;
            uow.add(staged)
        }
    }

    impl ServiceHooks<Person> for StagingHooks {
        async fn before_update<S: DataStore>(
            &self,
            uow: &mut UnitOfWork<S>,
            _entity: &mut Person,
        ) -> Result<()> {
            self.stage(uow)
        }

        async fn before_delete<S: DataStore>(
            &self,
            uow: &mut UnitOfWork<S>,
            _entity: &Person,
        ) -> Result<()> {
            self.stage(uow)
        }
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_key_is_not_found() {
        let hooks = StagingHooks::default();
        let people = service().with_hooks(hooks);
        people.create(person("Ann")).await.unwrap();
        let mark = people.high_water_mark().await.unwrap();

        let mut ghost = person("Ghost");
        ghost.id = 42;
        assert_eq!(people.update(&42, ghost).await.unwrap(), None);
        assert_eq!(people.delete(&42).await.unwrap(), None);

        assert_eq!(people.hooks.calls.load(Ordering::SeqCst), 0);
        assert_eq!(people.high_water_mark().await.unwrap(), mark);
        assert_eq!(people.all_ids().await.unwrap(), vec![1]);
        assert!(people.get_modified(mark).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hooks_stage_rows_on_found_delete() {
        let people = service().with_hooks(StagingHooks::default());
        people.create(person("Ann")).await.unwrap();

        assert!(people.delete(&1).await.unwrap().is_some());
        assert_eq!(people.hooks.calls.load(Ordering::SeqCst), 1);
        assert_eq!(people.all_ids().await.unwrap(), vec![1000]);
    }

    #[tokio::test]
    async fn test_stale_unit_of_work_counts_into_its_own_cache() {
        let people = service();
        for name in ["A", "B", "C"] {
            people.create(person(name)).await.unwrap();
        }
        let count_only = QueryRequest::new().with_count_mode(CountMode::CountOnly);

        let mut before = people.begin().await;
        people.reset_to_test_mode(InMemoryStore::new()).await;

        assert_eq!(people.get_with(&mut before, &count_only).await.unwrap().count, Some(3));
        assert!(people.backing().await.counts.is_empty());
        assert_eq!(before.count_cache().len(), 1);
        assert_eq!(people.get(&count_only).await.unwrap().count, Some(0));
    }

    #[tokio::test]
    async fn test_update_key_change_rejected() {
        let people = service();
        let ann = people.create(person("Ann")).await.unwrap();

        let mut moved = ann.clone();
        moved.id = 99;
        let err = people.update(&ann.id, moved).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_get_rejects_select() {
        let people = service();
        let err = people
            .get(&QueryRequest::new().with_select("Name"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_get_projected() {
        let people = service();
        for name in ["Ann", "Ben", "Cy"] {
            people.create(person(name)).await.unwrap();
        }

        let result = people
            .get_projected(
                &QueryRequest::new()
                    .with_select("new (Name, Id * 10 as Score)")
                    .with_order_by("Name desc")
                    .with_take(2)
                    .with_count_mode(CountMode::Count),
            )
            .await
            .unwrap();

        assert_eq!(result.count, Some(3));
        assert_eq!(
            result.rows(),
            &[
                json!({"Name": "Cy", "Score": 30}),
                json!({"Name": "Ben", "Score": 20})
            ]
        );
    }

    #[tokio::test]
    async fn test_high_water_mark_of_empty_store() {
        let people = service();
        assert_eq!(
            people.high_water_mark().await.unwrap(),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[tokio::test]
    async fn test_all_ids_sorted() {
        let people = service();
        for name in ["A", "B", "C"] {
            people.create(person(name)).await.unwrap();
        }
        people.delete(&2).await.unwrap();

        assert_eq!(people.all_ids().await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let people = service();
        let other = people.clone();

        people.create(person("Ann")).await.unwrap();
        assert!(other.find(&1).await.unwrap().is_some());
        assert!(people.health_check().await.unwrap());
    }
}
