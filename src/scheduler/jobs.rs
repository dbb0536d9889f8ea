//! The NetPulse background jobs and their wiring into the [`Scheduler`].

use super::{task, Scheduler};
use crate::alerts::AlertEvaluator;
use crate::config::JobsConfig;
use crate::detect::DetectionEngine;
use crate::storage::SqliteStore;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub const BASELINE_COMPUTE: &str = "baseline-compute";
pub const ANOMALY_DETECT: &str = "anomaly-detect";
pub const PATTERN_DETECT: &str = "pattern-detect";
pub const ALERT_EVALUATE: &str = "alert-evaluate";
pub const ROLLUP_REFRESH: &str = "rollup-refresh";

/// Everything the jobs act on.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<SqliteStore>,
    pub engine: Arc<DetectionEngine>,
    /// Only one evaluation runs at a time, so the lock is never contended.
    pub evaluator: Arc<Mutex<AlertEvaluator>>,
}

impl Pipeline {
    pub async fn compute_baselines(&self) -> Result<()> {
        self.engine
            .refresh_baselines(Utc::now())
            .await
            .context("baseline computation failed")?;
        Ok(())
    }

    pub async fn detect_anomalies(&self) -> Result<()> {
        self.engine
            .run_detection(Utc::now())
            .await
            .context("anomaly detection failed")?;
        Ok(())
    }

    pub async fn detect_patterns(&self) -> Result<()> {
        let patterns = self
            .engine
            .scan_patterns(Utc::now())
            .await
            .context("pattern scan failed")?;
        if !patterns.is_empty() {
            info!(count = patterns.len(), "recurring patterns found");
            for p in &patterns {
                info!(probe_id = %p.probe_id, occurrences = p.occurrences, "{}", p.description);
            }
        }
        Ok(())
    }

    pub async fn evaluate_alerts(&self) -> Result<()> {
        let fired = self
            .evaluator
            .lock()
            .await
            .evaluate(Utc::now())
            .await
            .context("alert evaluation failed")?;
        if fired > 0 {
            info!(fired, "alerts fired");
        }
        Ok(())
    }

    pub async fn refresh_rollups(&self, lookback_minutes: u32) -> Result<()> {
        let now = Utc::now();
        self.store
            .refresh_rollups(now - Duration::minutes(i64::from(lookback_minutes)), now)
            .await
            .context("rollup refresh failed")?;
        Ok(())
    }
}

/// Register the five NetPulse jobs on their configured cadences.
pub fn register_all(scheduler: &mut Scheduler, pipeline: &Pipeline, cadences: &JobsConfig) -> Result<()> {
    let p = pipeline.clone();
    scheduler.register(
        BASELINE_COMPUTE,
        &cadences.baseline_compute,
        task(move || {
            let p = p.clone();
            async move { p.compute_baselines().await }
        }),
    )?;

    let p = pipeline.clone();
    scheduler.register(
        ANOMALY_DETECT,
        &cadences.anomaly_detect,
        task(move || {
            let p = p.clone();
            async move { p.detect_anomalies().await }
        }),
    )?;

    let p = pipeline.clone();
    scheduler.register(
        PATTERN_DETECT,
        &cadences.pattern_detect,
        task(move || {
            let p = p.clone();
            async move { p.detect_patterns().await }
        }),
    )?;

    let p = pipeline.clone();
    scheduler.register(
        ALERT_EVALUATE,
        &cadences.alert_evaluate,
        task(move || {
            let p = p.clone();
            async move { p.evaluate_alerts().await }
        }),
    )?;

    let p = pipeline.clone();
    let lookback = cadences.rollup_lookback_minutes;
    scheduler.register(
        ROLLUP_REFRESH,
        &cadences.rollup_refresh,
        task(move || {
            let p = p.clone();
            async move { p.refresh_rollups(lookback).await }
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Notifier;
    use crate::config::{DetectionConfig, SmtpConfig};
    use crate::events::EventBus;
    use crate::scheduler::RunOutcome;
    use crate::storage::open_memory_pool;

    fn pipeline() -> Pipeline {
        let store = Arc::new(SqliteStore::new(open_memory_pool().unwrap(), std::time::Duration::from_secs(5)));
        let events = EventBus::default();
        let engine = Arc::new(DetectionEngine::new(store.clone(), events.clone(), DetectionConfig::default()));
        let notifier = Notifier::new(&SmtpConfig::default(), std::time::Duration::from_secs(5)).unwrap();
        let evaluator = AlertEvaluator::new(store.clone(), notifier, events, Duration::minutes(30));
        Pipeline { store, engine, evaluator: Arc::new(Mutex::new(evaluator)) }
    }

    #[test]
    fn test_all_jobs_registered() {
        let mut scheduler = Scheduler::new();
        register_all(&mut scheduler, &pipeline(), &JobsConfig::default()).unwrap();

        let names: Vec<String> = scheduler.status().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![BASELINE_COMPUTE, ANOMALY_DETECT, PATTERN_DETECT, ALERT_EVALUATE, ROLLUP_REFRESH]
        );
    }

    #[test]
    fn test_bad_cadence_fails_registration() {
        let cadences = JobsConfig { alert_evaluate: "whenever".into(), ..JobsConfig::default() };
        assert!(register_all(&mut Scheduler::new(), &pipeline(), &cadences).is_err());
    }

    #[tokio::test]
    async fn test_jobs_run_on_empty_database() {
        let mut scheduler = Scheduler::new();
        register_all(&mut scheduler, &pipeline(), &JobsConfig::default()).unwrap();

        for name in [ROLLUP_REFRESH, BASELINE_COMPUTE, ANOMALY_DETECT, PATTERN_DETECT, ALERT_EVALUATE] {
            let job = scheduler.job(name).unwrap();
            assert_eq!(job.run_once().await, RunOutcome::Completed, "{name}");
        }
    }
}
