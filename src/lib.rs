//! # crud-kit
//!
//! Dynamic querying, paging with cached totals, and a CRUD facade over a
//! pluggable data store.
//!
//! ## Features
//!
//! - **Dynamic expressions:** filters, orderings and projections arrive as
//!   strings (`Title.Contains(@0)`, `ReleaseDate desc`, `new (Title, Year)`)
//!   and are compiled before any data is touched
//! - **Paged counts:** the total number of matches is computed after filtering
//!   and before paging, and cached per filter for a configurable tolerance
//! - **Unit of work:** changes across entity types commit atomically, with the
//!   current user stamped on every audited entity
//! - **Watermarks:** every committed row carries its commit timestamp, so
//!   callers can ask for everything written after a point in time
//! - **Store agnostic:** implement [`DataStore`] for your database;
//!   [`store::InMemoryStore`] ships for tests and prototyping
//!
//! ## Quick Start
//!
//! ```ignore
//! use crud_kit::{CountMode, CrudService, Entity, QueryRequest};
//! use crud_kit::store::InMemoryStore;
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! // 1. Define your entity
//! #[derive(Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct Movie {
//!     id: i64,
//!     title: String,
//! }
//!
//! // 2. Implement Entity
//! impl Entity for Movie {
//!     type Key = i64;
//!     fn key(&self) -> Self::Key { self.id }
//!     fn table_name() -> &'static str { "movies" }
//! }
//!
//! // 3. Create the service (Clone is cheap - just Arc increments)
//! let movies: CrudService<Movie, _> = CrudService::new(InMemoryStore::new());
//!
//! // 4. Query a page together with the total count
//! let page = movies
//!     .get(&QueryRequest::new()
//!         .with_filter("Title.Contains(@0)", vec![json!("o")])
//!         .with_order_by("Title")
//!         .with_take(10)
//!         .with_count_mode(CountMode::Count))
//!     .await?;
//! ```

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod expression;
pub mod hooks;
pub mod identity;
pub mod key;
pub mod observability;
pub mod query;
pub mod serialization;
pub mod service;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use cache::{CountCache, CountCacheStats};
pub use config::ServiceConfig;
pub use entity::{Entity, HasIntegerId, HasSysGuid, HasSysUser};
pub use error::{Error, Result};
pub use expression::{Filter, Projection, SortOrder};
pub use hooks::{NoHooks, ServiceHooks};
pub use identity::{Anonymous, IdentityProvider, StaticIdentity};
pub use query::{CountMode, QueryBuilder, QueryRequest, QueryResult};
pub use service::CrudService;
pub use session::{EntryState, UnitOfWork};
pub use store::DataStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
