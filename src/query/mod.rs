//! Query requests, count modes and composed query plans.
//!
//! # Count modes
//!
//! | Mode | Count | Data | Use Case |
//! |------|-------|------|----------|
//! | **None** | not computed | page | Plain listing |
//! | **Count** | all matches | page | Paged grids showing "N results" |
//! | **CountOnly** | all matches | not materialized | Badges, totals |
//!
//! # Composition order
//!
//! Every query is composed in the same fixed order:
//!
//! ```text
//! include -> filter -> [count] -> sort -> skip -> take -> tracking
//! ```
//!
//! The count is taken after filtering and before paging, so it is the same
//! for every page of one filter.

pub mod builder;

use crate::error::{Error, Result};
use crate::expression::{Filter, SortOrder};
use serde_json::Value;
use std::time::Duration;

pub use builder::QueryBuilder;

/// Controls whether and how the total-row count is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CountMode {
    /// **None**: no count, data only.
    #[default]
    None,

    /// **Count**: count of all matching rows (page independent) plus data.
    Count,

    /// **CountOnly**: count only; the query is never materialized.
    CountOnly,
}

impl std::fmt::Display for CountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CountMode::None => write!(f, "None"),
            CountMode::Count => write!(f, "Count"),
            CountMode::CountOnly => write!(f, "CountOnly"),
        }
    }
}

/// Immutable description of one query.
///
/// Built fresh per call with the `with_*` methods:
///
/// ```
/// use crud_kit::query::{CountMode, QueryRequest};
/// use serde_json::json;
///
/// let request = QueryRequest::new()
///     .with_filter("Title.Contains(@0)", vec![json!("o")])
///     .with_order_by("ReleaseDate desc")
///     .with_skip(3)
///     .with_take(4)
///     .with_count_mode(CountMode::Count);
/// assert_eq!(request.take, 4);
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    /// Projection expression (`new (Title, Year)`); only for projected queries.
    pub select: Option<String>,
    /// Filter expression with `@n` placeholders.
    pub filter: Option<String>,
    /// Values bound to the filter's placeholders.
    pub filter_args: Vec<Value>,
    /// Ordering expression (`ReleaseDate desc, Title`).
    pub order_by: Option<String>,
    /// Rows to skip; `0` means not specified.
    pub skip: usize,
    /// Rows to take; `0` means not specified.
    pub take: usize,
    pub count_mode: CountMode,
    /// Relationship paths to eager-load (`Director`, `Cast.Actor`).
    pub include: Vec<String>,
    /// Return results without attaching them to the unit of work.
    pub no_tracking: bool,
    /// Override of the count staleness tolerance for this request.
    pub count_staleness: Option<Duration>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>, args: Vec<Value>) -> Self {
        self.filter = Some(filter.into());
        self.filter_args = args;
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_take(mut self, take: usize) -> Self {
        self.take = take;
        self
    }

    pub fn with_count_mode(mut self, mode: CountMode) -> Self {
        self.count_mode = mode;
        self
    }

    pub fn with_include(mut self, path: impl Into<String>) -> Self {
        self.include.push(path.into());
        self
    }

    pub fn with_no_tracking(mut self) -> Self {
        self.no_tracking = true;
        self
    }

    /// Override the count staleness tolerance for this request only.
    pub fn with_count_staleness(mut self, staleness: Duration) -> Self {
        self.count_staleness = Some(staleness);
        self
    }
}

/// Composed query, ready to run against a store.
///
/// Produced by [`QueryBuilder`]; the steps are applied by
/// [`QueryPlan::execute`] in the order they were composed.
#[derive(Clone, Debug, Default)]
pub struct QueryPlan {
    pub includes: Vec<String>,
    pub filter: Option<Filter>,
    pub order: Option<SortOrder>,
    pub skip: Option<usize>,
    pub take: Option<usize>,
    pub no_tracking: bool,
}

impl QueryPlan {
    /// Apply the plan to a full table scan.
    ///
    /// # Errors
    ///
    /// - `Error::QueryError`: an include path or field does not exist
    /// - `Error::EvaluationError`: an expression failed on a row
    pub fn execute(&self, rows: Vec<Value>) -> Result<Vec<Value>> {
        for row in &rows {
            for path in &self.includes {
                check_include(row, path)?;
            }
        }

        let mut rows = match &self.filter {
            None => rows,
            Some(filter) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if filter.matches(&row)? {
                        kept.push(row);
                    }
                }
                kept
            }
        };

        if let Some(order) = &self.order {
            rows = order.sort(rows)?;
        }

        let rows = rows.into_iter().skip(self.skip.unwrap_or(0));
        Ok(match self.take {
            Some(take) => rows.take(take).collect(),
            None => rows.collect(),
        })
    }
}

/// Walk an include path through a row; every segment must exist.
///
/// Rows are self-contained documents, so related data is already present;
/// the walk only rejects paths that name nothing.
fn check_include(row: &Value, path: &str) -> Result<()> {
    let mut current = vec![row];

    for segment in path.split('.') {
        let mut next = vec![];
        for value in current {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        next.push(include_segment(item, segment, path)?);
                    }
                }
                other => next.push(include_segment(other, segment, path)?),
            }
        }
        current = next;
    }

    Ok(())
}

fn include_segment<'a>(value: &'a Value, segment: &str, path: &str) -> Result<&'a Value> {
    if value.is_null() {
        return Ok(value);
    }
    value
        .as_object()
        .and_then(|object| object.get(segment))
        .ok_or_else(|| {
            Error::QueryError(format!(
                "Invalid include path '{}': no navigation '{}'",
                path, segment
            ))
        })
}

/// Page of data together with the total count of matches.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult<D> {
    /// `None` when the request used `CountMode::CountOnly`.
    pub data: Option<Vec<D>>,
    /// `None` when the request used `CountMode::None`.
    pub count: Option<usize>,
}

impl<D> QueryResult<D> {
    /// Page data, empty for count-only results.
    pub fn rows(&self) -> &[D] {
        self.data.as_deref().unwrap_or(&[])
    }
}
