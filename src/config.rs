//! Service configuration.

use crate::error::{Error, Result};
use crate::observability::StalenessPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration of a [`crate::service::CrudService`].
///
/// Count staleness is resolved per query, first match wins:
///
/// 1. the request's own override (`QueryRequest::with_count_staleness`)
/// 2. a per-table override from this config
/// 3. the [`StalenessPolicy`]
///
/// # Example
///
/// ```
/// use crud_kit::config::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::default()
///     .with_count_staleness(Duration::from_secs(30))
///     .with_table_staleness("audit_log", Duration::ZERO);
///
/// assert_eq!(config.staleness_for("movies"), Duration::from_secs(30));
/// assert_eq!(config.staleness_for("audit_log"), Duration::ZERO);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    pub staleness: StalenessPolicy,
    pub table_staleness: HashMap<String, Duration>,
}

/// JSON form of [`ServiceConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    count_staleness_secs: Option<u64>,
    #[serde(default)]
    per_table_staleness_secs: HashMap<String, u64>,
}

impl ServiceConfig {
    /// Use a fixed staleness tolerance for every table.
    pub fn with_count_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = StalenessPolicy::Fixed(staleness);
        self
    }

    /// Replace the staleness policy.
    pub fn with_staleness_policy(mut self, policy: StalenessPolicy) -> Self {
        self.staleness = policy;
        self
    }

    /// Override the staleness tolerance of one table.
    pub fn with_table_staleness(mut self, table: impl Into<String>, staleness: Duration) -> Self {
        self.table_staleness.insert(table.into(), staleness);
        self
    }

    /// Staleness tolerance for counts on `table`.
    pub fn staleness_for(&self, table: &str) -> Duration {
        self.table_staleness
            .get(table)
            .copied()
            .unwrap_or_else(|| self.staleness.tolerance(table))
    }

    /// Parse a JSON configuration.
    ///
    /// ```
    /// use crud_kit::config::ServiceConfig;
    /// use std::time::Duration;
    ///
    /// let config = ServiceConfig::from_json(
    ///     r#"{"count_staleness_secs": 120, "per_table_staleness_secs": {"orders": 5}}"#,
    /// ).unwrap();
    /// assert_eq!(config.staleness_for("orders"), Duration::from_secs(5));
    /// ```
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` for malformed JSON, unknown keys or negative
    /// durations.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid service config: {}", e)))?;

        let mut config = ServiceConfig::default();
        if let Some(secs) = raw.count_staleness_secs {
            config = config.with_count_staleness(Duration::from_secs(secs));
        }
        for (table, secs) in raw.per_table_staleness_secs {
            config = config.with_table_staleness(table, Duration::from_secs(secs));
        }

        debug!(
            "Loaded service config: staleness {:?}, {} table overrides",
            config.staleness,
            config.table_staleness.len()
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::DEFAULT_COUNT_STALENESS;

    #[test]
    fn test_default_config_uses_default_staleness() {
        let config = ServiceConfig::default();
        assert_eq!(config.staleness_for("movies"), DEFAULT_COUNT_STALENESS);
    }

    #[test]
    fn test_table_override_beats_policy() {
        let config = ServiceConfig::default()
            .with_staleness_policy(StalenessPolicy::PerType(|_| Duration::from_secs(7)))
            .with_table_staleness("movies", Duration::from_secs(1));

        assert_eq!(config.staleness_for("movies"), Duration::from_secs(1));
        assert_eq!(config.staleness_for("people"), Duration::from_secs(7));
    }

    #[test]
    fn test_from_json() {
        let config = ServiceConfig::from_json(
            r#"{"count_staleness_secs": 10, "per_table_staleness_secs": {"movies": 0}}"#,
        )
        .expect("valid config");

        assert_eq!(config.staleness_for("people"), Duration::from_secs(10));
        assert_eq!(config.staleness_for("movies"), Duration::ZERO);
    }

    #[test]
    fn test_from_json_empty_object_is_default() {
        let config = ServiceConfig::from_json("{}").expect("valid config");
        assert_eq!(config.staleness_for("x"), DEFAULT_COUNT_STALENESS);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        for bad in [
            r#"{"count_staleness_secs": -1}"#,
            r#"{"count_stalenes_secs": 1}"#,
            "not json",
        ] {
            let err = ServiceConfig::from_json(bad).unwrap_err();
            assert!(matches!(err, Error::ConfigError(_)), "{}", bad);
        }
    }
}
