//! NetPulse -- connection quality monitoring.
//!
//! Learns a time-of-week baseline per probe and metric, opens and closes
//! anomalies against it, spots weekly recurring degradation, fires
//! rate-limited threshold alerts and grades connections A to F.

pub mod alerts;
pub mod config;
pub mod detect;
pub mod events;
pub mod metrics;
pub mod scheduler;
pub mod scoring;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertEvaluator, Notifier};
use crate::config::NetpulseConfig;
use crate::detect::DetectionEngine;
use crate::events::EventBus;
use crate::scheduler::{jobs, Pipeline, Scheduler};
use crate::storage::SqliteStore;

/// The wired-up core: store, event bus, detection engine and alert evaluator.
pub struct NetPulse {
    pub config: NetpulseConfig,
    pub store: Arc<SqliteStore>,
    pub events: EventBus,
    pub engine: Arc<DetectionEngine>,
    pub evaluator: Arc<Mutex<AlertEvaluator>>,
}

impl NetPulse {
    pub fn open(config: NetpulseConfig) -> Result<Self> {
        let db_path = &config.storage.db_path;
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        tracing::info!(db_path = %db_path.display(), "opening database");
        let pool = storage::open_pool(
            &db_path.to_string_lossy(),
            config.storage.pool_size,
            config.storage.query_timeout(),
        )
        .context("failed to open database")?;
        let store = Arc::new(SqliteStore::new(pool, config.storage.query_timeout()));

        let events = EventBus::default();
        let engine = Arc::new(DetectionEngine::new(
            store.clone(),
            events.clone(),
            config.detection.clone(),
        ));
        let notifier = Notifier::new(&config.smtp, config.alerts.notify_timeout())
            .context("failed to set up notification channels")?;
        let evaluator = AlertEvaluator::new(
            store.clone(),
            notifier,
            events.clone(),
            config.alerts.cooldown(),
        );

        Ok(Self {
            config,
            store,
            events,
            engine,
            evaluator: Arc::new(Mutex::new(evaluator)),
        })
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            store: self.store.clone(),
            engine: self.engine.clone(),
            evaluator: self.evaluator.clone(),
        }
    }
}

/// Run every background job until `shutdown` is cancelled.
pub async fn serve(config: NetpulseConfig, shutdown: CancellationToken) -> Result<()> {
    let app = NetPulse::open(config)?;
    let pipeline = app.pipeline();

    let mut scheduler = Scheduler::new();
    jobs::register_all(&mut scheduler, &pipeline, &app.config.jobs)?;

    // Detection needs a snapshot; don't wait up to an hour for the first one.
    if let Err(e) = pipeline.compute_baselines().await {
        tracing::error!(error = %format!("{:#}", e), "initial baseline computation failed");
    }

    for job in scheduler.status() {
        tracing::debug!(job = %job.name, schedule = %job.schedule, "job ready");
    }
    scheduler.run(shutdown).await;
    Ok(())
}
