//! Storage contracts and the SQLite implementation.
//!
//! The detection and alerting pipeline only talks to [`Store`]. [`SqliteStore`]
//! is the bundled implementation; anything that can answer these queries
//! (a TimescaleDB view, an in-memory fake) can stand in for it.

pub mod schema;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod fault;

use crate::alerts::AlertConfig;
use crate::detect::{baseline, Anomaly, NewAnomaly, Severity};
use crate::metrics::{Metric, MetricValues};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use self::sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("blocking database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{count} open anomalies for ({probe_id}, {metric}); at most one may be open")]
    DuplicateOpenAnomaly {
        probe_id: String,
        metric: Metric,
        count: usize,
    },

    #[error("invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },

    #[error("anomaly {0} not found")]
    AnomalyNotFound(Uuid),
}

/// A 5-minute rollup for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub probe_id: String,
    pub bucket: DateTime<Utc>,
    pub values: MetricValues,
}

impl Rollup {
    pub fn hour_of_week(&self) -> u16 {
        baseline::hour_of_week(self.bucket)
    }
}

/// Result of an AVG/MAX over a live window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveAggregate {
    pub value: Option<f64>,
    pub sample_count: u64,
}

/// A raw measurement as reported by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub probe_id: String,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub values: MetricValues,
}

/// Queries and writes the detection/alerting core needs from persistence.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Rollups with `from < bucket <= to`.
    async fn rollups_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Rollup>, StoreError>;

    /// The metric's live aggregate (AVG or MAX) over raw samples with
    /// `from < time <= to`, optionally restricted to one probe.
    async fn live_aggregate(
        &self,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        probe_id: Option<&str>,
    ) -> Result<LiveAggregate, StoreError>;

    /// Average of every metric for one probe over `[from, to]`.
    async fn probe_averages(
        &self,
        probe_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricValues, StoreError>;

    /// The open anomaly for a key. More than one is reported as
    /// [`StoreError::DuplicateOpenAnomaly`].
    async fn find_open_anomaly(
        &self,
        probe_id: &str,
        metric: Metric,
    ) -> Result<Option<Anomaly>, StoreError>;

    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, StoreError>;

    async fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<Uuid, StoreError>;

    async fn update_anomaly(
        &self,
        id: Uuid,
        actual_value: f64,
        severity: Severity,
    ) -> Result<(), StoreError>;

    async fn close_anomaly(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Closed anomalies that started after `since`.
    async fn closed_anomalies_since(&self, since: DateTime<Utc>) -> Result<Vec<Anomaly>, StoreError>;

    async fn active_alert_configs(&self) -> Result<Vec<AlertConfig>, StoreError>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str, size: u32, connection_timeout: Duration) -> Result<Pool, StoreError> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .max_size(size)
        .connection_timeout(connection_timeout)
        .build(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every pooled connection to `:memory:`
/// is a separate database, so the pool is capped at one.
pub fn open_memory_pool() -> Result<Pool, StoreError> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Canonical timestamp encoding. Fixed width, so text order is time order.
pub fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_time(table: &'static str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow {
            table,
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}
