//! [`Store`] on SQLite through an r2d2 pool.

use super::{
    decode_time, encode_time, LiveAggregate, Measurement, Pool, Rollup, Store, StoreError,
};
use crate::alerts::AlertConfig;
use crate::detect::{Anomaly, NewAnomaly, Severity};
use crate::metrics::{Metric, MetricValues};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const ANOMALY_COLUMNS: &str = "id, probe_id, metric, started_at, ended_at, expected_value, \
     actual_value, severity, day_of_week, hour_of_day, description";

/// [`Store`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
    query_timeout: Duration,
}

impl SqliteStore {
    pub fn new(pool: Pool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run blocking SQLite work off the runtime, bounded by the query timeout.
    ///
    /// A timeout only stops the wait. The blocking closure keeps running and a
    /// write may still commit after [`StoreError::Timeout`] is returned, so a
    /// timed-out lifecycle write must be treated as "outcome unknown" and is
    /// settled by the next reconcile reading the table again.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        });
        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(StoreError::Timeout(self.query_timeout)),
        }
    }

    /// Save a raw probe measurement.
    pub async fn insert_measurement(&self, m: &Measurement) -> Result<(), StoreError> {
        let m = m.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO measurements (probe_id, time, latency_avg, jitter, packet_loss, dns_time, bufferbloat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    m.probe_id,
                    encode_time(m.time),
                    m.values.latency,
                    m.values.jitter,
                    m.values.packet_loss,
                    m.values.dns,
                    m.values.bufferbloat,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Re-aggregate raw measurements in `[from, to]` into 5-minute rollups.
    /// `from` is aligned down to its bucket so partial buckets are rebuilt whole.
    /// Returns the number of rollup rows written.
    pub async fn refresh_rollups(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let bucket_width = TimeDelta::minutes(5);
        let start = from.duration_trunc(bucket_width).map_err(|e| StoreError::InvalidRow {
            table: "measurements",
            reason: format!("cannot align {}: {}", from, e),
        })?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let raw: Vec<(String, String, MetricValues)> = {
                let mut stmt = tx.prepare(
                    "SELECT probe_id, time, latency_avg, jitter, packet_loss, dns_time, bufferbloat
                     FROM measurements WHERE time >= ?1 AND time <= ?2",
                )?;
                let rows = stmt.query_map(params![encode_time(start), encode_time(to)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        MetricValues {
                            latency: row.get(2)?,
                            jitter: row.get(3)?,
                            packet_loss: row.get(4)?,
                            dns: row.get(5)?,
                            bufferbloat: row.get(6)?,
                        },
                    ))
                })?;
                let collected: Vec<_> = rows.collect::<Result<_, _>>()?;
                collected
            };

            // (probe, bucket) -> (per-metric sum and count, rows)
            let mut buckets: BTreeMap<(String, DateTime<Utc>), ([(f64, u32); 5], u32)> =
                BTreeMap::new();
            for (probe_id, time, values) in raw {
                let time = decode_time("measurements", &time)?;
                let bucket = time.duration_trunc(bucket_width).map_err(|e| {
                    StoreError::InvalidRow { table: "measurements", reason: e.to_string() }
                })?;
                let entry = buckets.entry((probe_id, bucket)).or_insert(([(0.0, 0); 5], 0));
                for (i, metric) in Metric::ALL.iter().enumerate() {
                    if let Some(v) = values.get(*metric) {
                        entry.0[i].0 += v;
                        entry.0[i].1 += 1;
                    }
                }
                entry.1 += 1;
            }

            let written = buckets.len();
            {
                let mut upsert = tx.prepare(
                    "INSERT OR REPLACE INTO measurements_5min
                     (probe_id, bucket, latency_avg, jitter_avg, packet_loss_avg, dns_time_avg, bufferbloat_avg, sample_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for ((probe_id, bucket), (sums, count)) in buckets {
                    let avg = |i: usize| -> Option<f64> {
                        let (sum, n) = sums[i];
                        (n > 0).then(|| sum / n as f64)
                    };
                    upsert.execute(params![
                        probe_id,
                        encode_time(bucket),
                        avg(0),
                        avg(1),
                        avg(2),
                        avg(3),
                        avg(4),
                        count,
                    ])?;
                }
            }

            tx.commit()?;
            debug!(written, "rollups refreshed");
            Ok(written)
        })
        .await
    }

    pub async fn insert_alert_config(&self, config: &AlertConfig) -> Result<(), StoreError> {
        let config = config.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO alert_configs
                 (id, probe_id, metric, threshold, comparison, duration_min, channel, channel_config, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    config.id,
                    config.probe_id,
                    config.metric.as_str(),
                    config.threshold,
                    config.comparison.as_str(),
                    config.duration_min,
                    config.channel,
                    config.channel_config.to_string(),
                    config.is_active,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// All anomalies, newest first. Used by the CLI.
    pub async fn recent_anomalies(&self, limit: usize) -> Result<Vec<Anomaly>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM anomalies ORDER BY started_at DESC LIMIT ?1",
                ANOMALY_COLUMNS
            );
            query_anomalies(conn, &sql, params![limit as i64])
        })
        .await
    }
}

/// Raw anomaly row before text columns are parsed.
struct AnomalyRow {
    id: String,
    probe_id: String,
    metric: String,
    started_at: String,
    ended_at: Option<String>,
    expected_value: f64,
    actual_value: f64,
    severity: String,
    day_of_week: u8,
    hour_of_day: u8,
    description: String,
}

impl AnomalyRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            probe_id: row.get(1)?,
            metric: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            expected_value: row.get(5)?,
            actual_value: row.get(6)?,
            severity: row.get(7)?,
            day_of_week: row.get(8)?,
            hour_of_day: row.get(9)?,
            description: row.get(10)?,
        })
    }

    fn into_anomaly(self) -> Result<Anomaly, StoreError> {
        let invalid = |reason: String| StoreError::InvalidRow { table: "anomalies", reason };
        Ok(Anomaly {
            id: Uuid::parse_str(&self.id).map_err(|e| invalid(e.to_string()))?,
            probe_id: self.probe_id,
            metric: self.metric.parse().map_err(|e: crate::metrics::UnknownMetric| invalid(e.to_string()))?,
            started_at: decode_time("anomalies", &self.started_at)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|s| decode_time("anomalies", s))
                .transpose()?,
            expected_value: self.expected_value,
            actual_value: self.actual_value,
            severity: self.severity.parse().map_err(|e: anyhow::Error| invalid(e.to_string()))?,
            day_of_week: self.day_of_week,
            hour_of_day: self.hour_of_day,
            description: self.description,
        })
    }
}

fn query_anomalies(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Anomaly>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, AnomalyRow::from_row)?;
    let mut anomalies = Vec::new();
    for r in rows {
        anomalies.push(r?.into_anomaly()?);
    }
    Ok(anomalies)
}

fn live_row(row: &Row<'_>) -> rusqlite::Result<LiveAggregate> {
    Ok(LiveAggregate {
        value: row.get::<_, Option<f64>>(0)?,
        sample_count: row.get::<_, i64>(1)? as u64,
    })
}

fn changed_one(changed: usize, id: Uuid) -> Result<(), StoreError> {
    if changed == 0 {
        return Err(StoreError::AnomalyNotFound(id));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn rollups_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Rollup>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT probe_id, bucket, latency_avg, jitter_avg, packet_loss_avg, dns_time_avg, bufferbloat_avg
                 FROM measurements_5min
                 WHERE bucket > ?1 AND bucket <= ?2
                 ORDER BY bucket ASC",
            )?;
            let rows = stmt.query_map(params![encode_time(from), encode_time(to)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    MetricValues {
                        latency: row.get(2)?,
                        jitter: row.get(3)?,
                        packet_loss: row.get(4)?,
                        dns: row.get(5)?,
                        bufferbloat: row.get(6)?,
                    },
                ))
            })?;

            let mut rollups = Vec::new();
            for r in rows {
                let (probe_id, bucket, values) = r?;
                rollups.push(Rollup {
                    probe_id,
                    bucket: decode_time("measurements_5min", &bucket)?,
                    values,
                });
            }
            Ok(rollups)
        })
        .await
    }

    async fn live_aggregate(
        &self,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        probe_id: Option<&str>,
    ) -> Result<LiveAggregate, StoreError> {
        let probe_id = probe_id.map(str::to_string);
        self.with_conn(move |conn| {
            let column = metric.raw_column();
            let agg = metric.live_aggregation().sql();
            let probe_filter = if probe_id.is_some() { "AND probe_id = ?3" } else { "" };
            let sql = format!(
                "SELECT {agg}({column}), COUNT({column}) FROM measurements
                 WHERE time > ?1 AND time <= ?2 {probe_filter} AND {column} IS NOT NULL"
            );

            let result = match &probe_id {
                Some(p) => conn.query_row(&sql, params![encode_time(from), encode_time(to), p], live_row)?,
                None => conn.query_row(&sql, params![encode_time(from), encode_time(to)], live_row)?,
            };
            Ok(result)
        })
        .await
    }

    async fn probe_averages(
        &self,
        probe_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricValues, StoreError> {
        let probe_id = probe_id.to_string();
        self.with_conn(move |conn| {
            let values = conn.query_row(
                "SELECT AVG(latency_avg), AVG(jitter), AVG(packet_loss), AVG(dns_time), AVG(bufferbloat)
                 FROM measurements WHERE probe_id = ?1 AND time >= ?2 AND time <= ?3",
                params![probe_id, encode_time(from), encode_time(to)],
                |row| {
                    Ok(MetricValues {
                        latency: row.get(0)?,
                        jitter: row.get(1)?,
                        packet_loss: row.get(2)?,
                        dns: row.get(3)?,
                        bufferbloat: row.get(4)?,
                    })
                },
            )?;
            Ok(values)
        })
        .await
    }

    async fn find_open_anomaly(
        &self,
        probe_id: &str,
        metric: Metric,
    ) -> Result<Option<Anomaly>, StoreError> {
        let probe_id = probe_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM anomalies WHERE probe_id = ?1 AND metric = ?2 AND ended_at IS NULL",
                ANOMALY_COLUMNS
            );
            let mut open = query_anomalies(conn, &sql, params![probe_id, metric.as_str()])?;
            match open.len() {
                0 => Ok(None),
                1 => Ok(open.pop()),
                count => Err(StoreError::DuplicateOpenAnomaly { probe_id, metric, count }),
            }
        })
        .await
    }

    async fn open_anomalies(&self) -> Result<Vec<Anomaly>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM anomalies WHERE ended_at IS NULL ORDER BY started_at ASC",
                ANOMALY_COLUMNS
            );
            query_anomalies(conn, &sql, [])
        })
        .await
    }

    async fn create_anomaly(&self, anomaly: &NewAnomaly) -> Result<Uuid, StoreError> {
        let a = anomaly.clone();
        self.with_conn(move |conn| {
            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO anomalies
                 (id, probe_id, metric, started_at, expected_value, actual_value, severity, day_of_week, hour_of_day, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    a.probe_id,
                    a.metric.as_str(),
                    encode_time(a.started_at),
                    a.expected_value,
                    a.actual_value,
                    a.severity.as_str(),
                    a.day_of_week,
                    a.hour_of_day,
                    a.description,
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn update_anomaly(
        &self,
        id: Uuid,
        actual_value: f64,
        severity: Severity,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE anomalies SET actual_value = ?2, severity = ?3 WHERE id = ?1",
                params![id.to_string(), actual_value, severity.as_str()],
            )?;
            changed_one(changed, id)
        })
        .await
    }

    async fn close_anomaly(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE anomalies SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
                params![id.to_string(), encode_time(ended_at)],
            )?;
            changed_one(changed, id)
        })
        .await
    }

    async fn closed_anomalies_since(&self, since: DateTime<Utc>) -> Result<Vec<Anomaly>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM anomalies WHERE ended_at IS NOT NULL AND started_at > ?1",
                ANOMALY_COLUMNS
            );
            query_anomalies(conn, &sql, params![encode_time(since)])
        })
        .await
    }

    async fn active_alert_configs(&self) -> Result<Vec<AlertConfig>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, probe_id, metric, threshold, comparison, duration_min, channel, channel_config
                 FROM alert_configs WHERE is_active = 1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;

            let mut configs = Vec::new();
            for r in rows {
                let (id, probe_id, metric, threshold, comparison, duration_min, channel, channel_config) = r?;
                // A malformed rule is skipped so it cannot block the rest.
                let metric = match metric.parse::<Metric>() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(alert_id = %id, error = %e, "skipping alert config");
                        continue;
                    }
                };
                let comparison = match comparison.parse() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(alert_id = %id, error = %e, "skipping alert config");
                        continue;
                    }
                };
                let channel_config = serde_json::from_str(&channel_config).unwrap_or_else(|e| {
                    warn!(alert_id = %id, error = %e, "channel config is not valid JSON");
                    serde_json::Value::Null
                });
                configs.push(AlertConfig {
                    id,
                    probe_id,
                    metric,
                    threshold,
                    comparison,
                    duration_min,
                    channel,
                    channel_config,
                    is_active: true,
                });
            }
            Ok(configs)
        })
        .await
    }
}

/// Insert an anomaly row verbatim. Lets tests set up states the
/// lifecycle itself would never produce.
#[cfg(test)]
pub(crate) fn insert_raw_anomaly(pool: &Pool, a: &Anomaly) -> Result<(), StoreError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO anomalies
         (id, probe_id, metric, started_at, ended_at, expected_value, actual_value, severity, day_of_week, hour_of_day, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            a.id.to_string(),
            a.probe_id,
            a.metric.as_str(),
            encode_time(a.started_at),
            a.ended_at.map(encode_time),
            a.expected_value,
            a.actual_value,
            a.severity.as_str(),
            a.day_of_week,
            a.hour_of_day,
            a.description,
        ],
    )?;
    Ok(())
}
