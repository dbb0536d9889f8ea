//! A [`Store`] that forwards to SQLite with injected failures, for tests.

use super::{LiveAggregate, Rollup, SqliteStore, Store, StoreError};
use crate::alerts::AlertConfig;
use crate::detect::{Anomaly, NewAnomaly, Severity};
use crate::metrics::{Metric, MetricValues};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const FAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct FaultyStore {
    inner: Arc<SqliteStore>,
    /// Live queries for this metric time out.
    pub live_timeout_for: Option<Metric>,
    /// `close_anomaly` commits and then reports a timeout anyway.
    pub close_commits_then_times_out: bool,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            live_timeout_for: None,
            close_commits_then_times_out: false,
        }
    }
}

#[async_trait::async_trait]
impl Store for FaultyStore {
    async fn rollups_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Rollup>, StoreError> {
        self.inner.rollups_between(from, to).await
    }

    async fn live_aggregate(
        &self,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        probe_id: Option<&str>,
    ) -> Result<LiveAggregate, StoreError> {
        if self.live_timeout_for == Some(metric) {
            return Err(StoreError::Timeout(FAKE_TIMEOUT));
        }
        self.inner.live_aggregate(metric, from, to, probe_id).await
    }

    async fn probe_averages(
        &self,
        probe_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricValues, StoreError> {
        self.inner.probe_averages(probe_id, from, to).await
    }

    async fn find_open_anomaly(
        &self,
        probe_id: &str,
        metric: Metric,
    ) -> Result<Option<Anomaly>, StoreError> {
        self.inner.find_open_anomaly(probe_id, metric).await
    }

    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, StoreError> {
        self.inner.open_anomalies().await
    }

    async fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<Uuid, StoreError> {
        self.inner.create_anomaly(anomaly).await
    }

    async fn update_anomaly(
        &self,
        id: Uuid,
        actual_value: f64,
        severity: Severity,
    ) -> Result<(), StoreError> {
        self.inner.update_anomaly(id, actual_value, severity).await
    }

    async fn close_anomaly(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.close_anomaly(id, ended_at).await?;
        if self.close_commits_then_times_out {
            return Err(StoreError::Timeout(FAKE_TIMEOUT));
        }
        Ok(())
    }

    async fn closed_anomalies_since(&self, since: DateTime<Utc>) -> Result<Vec<Anomaly>, StoreError> {
        self.inner.closed_anomalies_since(since).await
    }

    async fn active_alert_configs(&self) -> Result<Vec<AlertConfig>, StoreError> {
        self.inner.active_alert_configs().await
    }
}
