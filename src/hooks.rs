//! Lifecycle hooks around create, update and delete.

use crate::entity::Entity;
use crate::error::Result;
use crate::session::UnitOfWork;
use crate::store::DataStore;

/// Lifecycle hooks invoked by [`crate::service::CrudService`].
///
/// Every method has a no-op default; implement only what you need. The
/// `before_*` hooks receive the unit of work the operation will commit, so
/// changes they stage (for example cascade deletes of dependent rows) are
/// saved atomically with the operation itself.
///
/// # Example
///
/// ```ignore
/// struct MovieHooks;
///
/// impl ServiceHooks<Movie> for MovieHooks {
///     async fn before_delete<S: DataStore>(
///         &self,
///         uow: &mut UnitOfWork<S>,
///         movie: &Movie,
///     ) -> Result<()> {
///         for role in uow.query::<Role>(&roles_of(movie.id)).await? {
///             uow.remove(&role)?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait ServiceHooks<T: Entity>: Send + Sync {
    /// Called before a new entity is added. May modify the entity.
    async fn before_create<S: DataStore>(
        &self,
        _uow: &mut UnitOfWork<S>,
        _entity: &mut T,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the entity was committed.
    async fn after_create(&self, _entity: &T) -> Result<()> {
        Ok(())
    }

    /// Called after fields were copied onto the tracked record and before
    /// it is committed.
    async fn before_update<S: DataStore>(
        &self,
        _uow: &mut UnitOfWork<S>,
        _entity: &mut T,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the update was committed.
    async fn after_update(&self, _entity: &T) -> Result<()> {
        Ok(())
    }

    /// Called before the entity is removed; the place for cascade deletes.
    async fn before_delete<S: DataStore>(
        &self,
        _uow: &mut UnitOfWork<S>,
        _entity: &T,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the removal was committed, with the prior state.
    async fn after_delete(&self, _entity: &T) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<T: Entity> ServiceHooks<T> for NoHooks {}
