//! Owns the current baseline snapshot and drives detection passes over it.

use crate::config::DetectionConfig;
use crate::detect::anomaly::detect_candidates;
use crate::detect::baseline::{compute_baselines, BaselineSnapshot};
use crate::detect::lifecycle::{LifecycleManager, ReconcileSummary};
use crate::detect::patterns::{detect_recurring_patterns, RecurringPattern};
use crate::events::EventBus;
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Outcome of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionReport {
    pub candidates: usize,
    pub summary: ReconcileSummary,
}

/// Holds the current baseline snapshot and drives the anomaly pipeline.
///
/// The snapshot is replaced wholesale on every refresh. Readers clone the
/// `Arc` and keep a consistent view for the whole pass.
pub struct DetectionEngine {
    store: Arc<dyn Store>,
    snapshot: RwLock<Arc<BaselineSnapshot>>,
    lifecycle: LifecycleManager,
    settings: DetectionConfig,
}

impl DetectionEngine {
    pub fn new(store: Arc<dyn Store>, events: EventBus, settings: DetectionConfig) -> Self {
        let lifecycle = LifecycleManager::new(store.clone(), events);
        Self {
            store,
            snapshot: RwLock::new(Arc::new(BaselineSnapshot::empty())),
            lifecycle,
            settings,
        }
    }

    pub fn snapshot(&self) -> Arc<BaselineSnapshot> {
        self.snapshot.read().clone()
    }

    /// Drop the learned baseline. Detection is skipped until the next refresh.
    pub fn reset(&self) {
        *self.snapshot.write() = Arc::new(BaselineSnapshot::empty());
    }

    /// Recompute every bucket from the trailing history and swap it in.
    pub async fn refresh_baselines(&self, now: DateTime<Utc>) -> Result<Arc<BaselineSnapshot>, StoreError> {
        let from = now - Duration::weeks(i64::from(self.settings.baseline_weeks));
        info!(weeks = self.settings.baseline_weeks, "computing baselines");

        let rollups = self.store.rollups_between(from, now).await?;
        let fresh = Arc::new(compute_baselines(&rollups, now));
        *self.snapshot.write() = fresh.clone();

        info!(
            buckets = fresh.len(),
            probes = fresh.probe_count(),
            rollups = rollups.len(),
            "baselines computed"
        );
        Ok(fresh)
    }

    /// Compare recent rollups with the snapshot and reconcile anomalies.
    /// Returns `None` when there is no baseline yet.
    pub async fn run_detection(&self, now: DateTime<Utc>) -> Result<Option<DetectionReport>, StoreError> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            info!("no baselines available, skipping detection");
            return Ok(None);
        }

        let from = now - Duration::minutes(i64::from(self.settings.detection_window_minutes));
        let recent = self.store.rollups_between(from, now).await?;
        let candidates = detect_candidates(&snapshot, &recent, self.settings.min_baseline_samples);
        let summary = self.lifecycle.reconcile(&candidates, now).await?;

        if summary.opened > 0 || summary.closed > 0 {
            info!(
                candidates = candidates.len(),
                opened = summary.opened,
                extended = summary.extended,
                closed = summary.closed,
                "anomalies reconciled"
            );
        }
        Ok(Some(DetectionReport { candidates: candidates.len(), summary }))
    }

    pub async fn scan_patterns(&self, now: DateTime<Utc>) -> Result<Vec<RecurringPattern>, StoreError> {
        let since = now - Duration::weeks(i64::from(self.settings.pattern_weeks));
        detect_recurring_patterns(self.store.as_ref(), since, self.settings.min_pattern_occurrences).await
    }
}
