//! Connector configuration for the read and write surfaces.
//!
//! Validation happens synchronously via `validate`, before any RPC is
//! issued: a missing project, a contradictory query setup, or a non-positive
//! user limit is a construction-time error, not a runtime one.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::{Partition, Query, ReadOptions, StoreError, StoreResult, Timestamp};

use crate::planner::NUM_QUERY_SPLITS_MAX;
use crate::throttle::DEFAULT_HINT_NUM_WORKERS;

/// Opaque credential object threaded to the transport factory.
///
/// The connector does not interpret it; it only carries it. `Debug` and
/// `Display` never reveal the token.
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    /// Unauthenticated access, e.g. against an emulator.
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Bearer-token credential.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token {
            Some(_) => f.write_str("Credentials(bearer)"),
            None => f.write_str("Credentials(anonymous)"),
        }
    }
}

/// Configuration of the read surface: where to read and what to read.
///
/// Exactly one of `query` and `gql_query` must be set. `num_query_splits`
/// zero selects dynamic split-count estimation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReadConfig {
    pub project_id: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default)]
    pub namespace: String,
    /// Emulator `host:port`, overriding the production endpoint.
    #[serde(default)]
    pub localhost: Option<String>,
    #[serde(default)]
    pub query: Option<Query>,
    #[serde(default)]
    pub gql_query: Option<String>,
    #[serde(default)]
    pub num_query_splits: u32,
    /// Snapshot timestamp in milliseconds since epoch.
    #[serde(default)]
    pub read_time_millis: Option<i64>,
    #[serde(skip)]
    pub credentials: Credentials,
}

impl ReadConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_localhost(mut self, localhost: impl Into<String>) -> Self {
        self.localhost = Some(localhost.into());
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_gql_query(mut self, gql: impl Into<String>) -> Self {
        self.gql_query = Some(gql.into());
        self
    }

    /// Requested split count; values above the cap are clamped.
    pub fn with_num_query_splits(mut self, num_query_splits: u32) -> Self {
        self.num_query_splits = num_query_splits.min(NUM_QUERY_SPLITS_MAX);
        self
    }

    pub fn with_read_time_millis(mut self, millis: i64) -> Self {
        self.read_time_millis = Some(millis);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Check the configuration for contradictions. Called before planning.
    pub fn validate(&self) -> StoreResult<()> {
        if self.project_id.is_empty() {
            return Err(StoreError::Config("project_id is required".into()));
        }
        match (&self.query, &self.gql_query) {
            (None, None) => {
                return Err(StoreError::Config(
                    "either query or gql_query is required".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(StoreError::Config(
                    "query and gql_query are exclusive".into(),
                ))
            }
            _ => {}
        }
        if let Some(query) = &self.query {
            if let Some(limit) = query.limit {
                if limit <= 0 {
                    return Err(StoreError::Config(format!(
                        "invalid query limit {limit}: must be positive"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Partition addressed by this configuration.
    pub fn partition(&self) -> Partition {
        Partition {
            project_id: self.project_id.clone(),
            database_id: self.database_id.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Snapshot read options, when a read time is configured.
    pub fn read_options(&self) -> Option<ReadOptions> {
        self.read_time_millis.map(|millis| ReadOptions {
            read_time: Some(Timestamp::from_millis(millis)),
        })
    }
}

// Hand-rolled so logs get a compact one-line form with credentials omitted.
impl fmt::Display for ReadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read(project={}, database={:?}, namespace={:?}",
            self.project_id, self.database_id, self.namespace
        )?;
        if let Some(query) = &self.query {
            write!(f, ", kind={}", query.kind)?;
        }
        if let Some(gql) = &self.gql_query {
            write!(f, ", gql={gql:?}")?;
        }
        if let Some(localhost) = &self.localhost {
            write!(f, ", localhost={localhost}")?;
        }
        if self.num_query_splits > 0 {
            write!(f, ", splits={}", self.num_query_splits)?;
        }
        write!(f, ")")
    }
}

/// Configuration of the write/delete surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteConfig {
    pub project_id: String,
    #[serde(default)]
    pub database_id: String,
    /// Emulator `host:port`, overriding the production endpoint.
    #[serde(default)]
    pub localhost: Option<String>,
    /// Whether the warm-up ramp throttle is applied ahead of the writer.
    #[serde(default = "default_throttle_rampup")]
    pub throttle_rampup: bool,
    /// Expected worker count, used to derive the per-worker ramp-up budget.
    #[serde(default = "default_hint_num_workers")]
    pub hint_num_workers: u32,
    #[serde(skip)]
    pub credentials: Credentials,
}

fn default_throttle_rampup() -> bool {
    true
}

fn default_hint_num_workers() -> u32 {
    DEFAULT_HINT_NUM_WORKERS
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database_id: String::new(),
            localhost: None,
            throttle_rampup: true,
            hint_num_workers: DEFAULT_HINT_NUM_WORKERS,
            credentials: Credentials::default(),
        }
    }
}

impl WriteConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    pub fn with_localhost(mut self, localhost: impl Into<String>) -> Self {
        self.localhost = Some(localhost.into());
        self
    }

    pub fn with_throttle_rampup(mut self, throttle_rampup: bool) -> Self {
        self.throttle_rampup = throttle_rampup;
        self
    }

    pub fn with_hint_num_workers(mut self, hint_num_workers: u32) -> Self {
        self.hint_num_workers = hint_num_workers;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Check the configuration. Called at writer construction.
    pub fn validate(&self) -> StoreResult<()> {
        if self.project_id.is_empty() {
            return Err(StoreError::Config("project_id is required".into()));
        }
        if self.hint_num_workers == 0 {
            return Err(StoreError::Config(
                "hint_num_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for WriteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write(project={}, database={:?}, rampup={}, hint_workers={}",
            self.project_id, self.database_id, self.throttle_rampup, self.hint_num_workers
        )?;
        if let Some(localhost) = &self.localhost {
            write!(f, ", localhost={localhost}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_exactly_one_query_form() {
        let neither = ReadConfig::new("p");
        assert!(neither.validate().is_err());

        let both = ReadConfig::new("p")
            .with_query(Query::new("Order"))
            .with_gql_query("SELECT * FROM Order");
        assert!(both.validate().is_err());

        let one = ReadConfig::new("p").with_query(Query::new("Order"));
        assert!(one.validate().is_ok());
    }

    #[test]
    fn read_rejects_non_positive_limits() {
        let config = ReadConfig::new("p").with_query(Query::new("Order").with_limit(0));
        assert!(config.validate().is_err());
        let config = ReadConfig::new("p").with_query(Query::new("Order").with_limit(-3));
        assert!(config.validate().is_err());
        let config = ReadConfig::new("p").with_query(Query::new("Order").with_limit(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn split_request_is_capped() {
        let config = ReadConfig::new("p").with_num_query_splits(1_000_000);
        assert_eq!(config.num_query_splits, NUM_QUERY_SPLITS_MAX);
    }

    #[test]
    fn write_requires_project_and_workers() {
        assert!(WriteConfig::new("").validate().is_err());
        assert!(WriteConfig::new("p")
            .with_hint_num_workers(0)
            .validate()
            .is_err());
        assert!(WriteConfig::new("p").validate().is_ok());
    }

    #[test]
    fn credentials_never_leak_in_debug_output() {
        let creds = Credentials::bearer("super-secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
