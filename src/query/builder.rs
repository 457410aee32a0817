//! Query builder - composes a request into a plan and resolves its count.

use super::{CountMode, QueryPlan, QueryRequest};
use crate::cache::CountCache;
use crate::error::Result;
use crate::expression::{Filter, Projection, SortOrder};
use crate::store::DataStore;
use std::time::Duration;

/// Output of [`QueryBuilder::build`].
#[derive(Clone, Debug)]
pub struct ComposedQuery {
    /// `None` for `CountMode::CountOnly`: nothing is materialized.
    pub plan: Option<QueryPlan>,
    /// `None` for `CountMode::None`.
    pub count: Option<usize>,
    /// Compiled `select`, present only when the request had one and a plan
    /// was built.
    pub projection: Option<Projection>,
}

/// Composes requests against one table of a store.
///
/// The composition order is fixed:
///
/// 1. include paths
/// 2. filter
/// 3. count through the [`CountCache`] (post-filter, pre-paging)
/// 4. stop here for `CountOnly`
/// 5. sort, then skip, then take
/// 6. tracking mode
///
/// Expression errors are fatal for the request and never retried.
///
/// # Example
///
/// ```ignore
/// let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));
/// let composed = builder.build("movies", &request).await?;
/// let rows = store.query("movies", composed.plan.as_ref().unwrap()).await?;
/// ```
pub struct QueryBuilder<'a, S: DataStore> {
    store: &'a S,
    counts: &'a CountCache,
    staleness: Duration,
}

impl<'a, S: DataStore> QueryBuilder<'a, S> {
    /// Create a builder; `staleness` applies unless the request overrides it.
    pub fn new(store: &'a S, counts: &'a CountCache, staleness: Duration) -> Self {
        QueryBuilder {
            store,
            counts,
            staleness,
        }
    }

    /// Compose `request` into a plan and compute its count.
    ///
    /// # Errors
    ///
    /// - `Error::QueryError`: filter, sort or projection does not parse
    /// - `Error::EvaluationError`: the filter failed while counting
    /// - `Error::PersistenceError`: the store failed while counting
    pub async fn build(&self, table: &str, request: &QueryRequest) -> Result<ComposedQuery> {
        let mut plan = QueryPlan::default();

        // Step 1: eager-load paths
        plan.includes = request.include.clone();

        // Step 2: filter
        plan.filter = match request.filter.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                Some(Filter::parse(text, request.filter_args.clone())?)
            }
            _ => None,
        };

        // Step 3: count across all pages
        let count = match request.count_mode {
            CountMode::None => None,
            CountMode::Count | CountMode::CountOnly => {
                let staleness = request.count_staleness.unwrap_or(self.staleness);
                Some(
                    self.counts
                        .get_count(self.store, table, plan.filter.as_ref(), staleness)
                        .await?,
                )
            }
        };

        // Step 4: count-only requests stop before any materialization
        if request.count_mode == CountMode::CountOnly {
            debug!("» {} composed as count-only (count: {:?})", table, count);
            return Ok(ComposedQuery {
                plan: None,
                count,
                projection: None,
            });
        }

        // Step 5: sort, skip, take
        plan.order = match request.order_by.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(SortOrder::parse(text)?),
            _ => None,
        };
        plan.skip = (request.skip > 0).then_some(request.skip);
        plan.take = (request.take > 0).then_some(request.take);

        // Step 6: tracking
        plan.no_tracking = request.no_tracking;

        let projection = match request.select.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(Projection::parse(text)?),
            _ => None,
        };

        debug!(
            "» {} composed: filter={:?} order={:?} skip={:?} take={:?} count={:?}",
            table,
            request.filter,
            request.order_by,
            plan.skip,
            plan.take,
            count
        );

        Ok(ComposedQuery {
            plan: Some(plan),
            count,
            projection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{InMemoryStore, RowChange};
    use serde_json::json;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let changes = (1..=10)
            .map(|n| RowChange::Insert {
                table: "items",
                key: n.to_string(),
                data: json!({"N": n, "Even": n % 2 == 0}),
            })
            .collect();
        store.commit(changes).await.expect("Failed to seed");
        store
    }

    #[tokio::test]
    async fn test_count_is_page_independent() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));

        let request = QueryRequest::new()
            .with_filter("Even", vec![])
            .with_order_by("N")
            .with_skip(1)
            .with_take(2)
            .with_count_mode(CountMode::Count);

        let composed = builder.build("items", &request).await.expect("build");
        assert_eq!(composed.count, Some(5));

        let rows = store
            .query("items", composed.plan.as_ref().expect("plan"))
            .await
            .expect("query");
        let ns: Vec<i64> = rows.iter().map(|r| r["N"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 6]);
    }

    #[tokio::test]
    async fn test_count_only_builds_no_plan() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));

        // a broken ordering is never parsed for count-only requests
        let request = QueryRequest::new()
            .with_order_by("N desc desc")
            .with_select("new (")
            .with_count_mode(CountMode::CountOnly);

        let composed = builder.build("items", &request).await.expect("build");
        assert!(composed.plan.is_none());
        assert!(composed.projection.is_none());
        assert_eq!(composed.count, Some(10));
    }

    #[tokio::test]
    async fn test_count_mode_none_skips_cache() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));

        let composed = builder
            .build("items", &QueryRequest::new())
            .await
            .expect("build");

        assert_eq!(composed.count, None);
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn test_zero_skip_take_are_unspecified() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));

        let composed = builder
            .build("items", &QueryRequest::new().with_skip(0).with_take(0))
            .await
            .expect("build");
        let plan = composed.plan.expect("plan");

        assert_eq!(plan.skip, None);
        assert_eq!(plan.take, None);
        assert_eq!(store.query("items", &plan).await.expect("query").len(), 10);
    }

    #[tokio::test]
    async fn test_malformed_filter_is_query_error() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));

        let err = builder
            .build(
                "items",
                &QueryRequest::new()
                    .with_filter("N >", vec![])
                    .with_count_mode(CountMode::Count),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::QueryError(_)));
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn test_request_staleness_override() {
        let store = seeded().await;
        let counts = CountCache::new();
        let builder = QueryBuilder::new(&store, &counts, Duration::from_secs(60));
        let request = QueryRequest::new().with_count_mode(CountMode::CountOnly);

        assert_eq!(builder.build("items", &request).await.unwrap().count, Some(10));
        store
            .commit(vec![RowChange::Insert {
                table: "items",
                key: "11".to_string(),
                data: json!({"N": 11, "Even": false}),
            }])
            .await
            .unwrap();

        assert_eq!(builder.build("items", &request).await.unwrap().count, Some(10));
        let fresh = request.clone().with_count_staleness(Duration::ZERO);
        assert_eq!(builder.build("items", &fresh).await.unwrap().count, Some(11));
    }
}
