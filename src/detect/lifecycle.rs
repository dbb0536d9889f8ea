//! Anomaly lifecycle: reconciles one pass of candidates against persisted
//! open anomalies.
//!
//! Each (probe, metric) key is a two-state machine:
//!
//! ```text
//!   closed --candidates--> open      (create)
//!   open   --candidates--> open      (extend, worst value wins)
//!   open   --no candidates--> closed (set ended_at)
//! ```
//!
//! [`transition`] is the whole state machine; [`LifecycleManager::reconcile`]
//! only feeds it and persists the result. Every transition is a single write.

use crate::detect::anomaly::AnomalyCandidate;
use crate::detect::{Anomaly, NewAnomaly, Severity, DAY_NAMES};
use crate::events::{AnomalyEvent, AnomalyState, Event, EventBus};
use crate::metrics::Metric;
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// What to do with one (probe, metric) key this pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Open(NewAnomaly),
    Extend {
        id: Uuid,
        actual_value: f64,
        severity: Severity,
    },
    Close { id: Uuid },
    Idle,
}

/// Decide the transition for one key given its open anomaly (if any) and this
/// pass's candidates for that key (empty when none were seen).
pub fn transition(open: Option<&Anomaly>, candidates: &[AnomalyCandidate]) -> Transition {
    let worst = candidates
        .iter()
        .max_by(|a, b| a.actual_value.total_cmp(&b.actual_value));
    match (open, worst) {
        (None, None) => Transition::Idle,
        (Some(a), None) => Transition::Close { id: a.id },
        (Some(a), Some(worst)) => {
            // Never let a milder pass lower what was already recorded.
            if worst.actual_value > a.actual_value {
                Transition::Extend {
                    id: a.id,
                    actual_value: worst.actual_value,
                    severity: worst.severity,
                }
            } else {
                Transition::Extend {
                    id: a.id,
                    actual_value: a.actual_value,
                    severity: a.severity,
                }
            }
        }
        (None, Some(_)) => open_from(candidates).map_or(Transition::Idle, Transition::Open),
    }
}

/// Started at the earliest bucket; values and severity from the latest one.
fn open_from(candidates: &[AnomalyCandidate]) -> Option<NewAnomaly> {
    let earliest = candidates.iter().map(|c| c.bucket_time).min()?;
    let latest = candidates.iter().max_by_key(|c| c.bucket_time)?;

    let day_of_week = (latest.hour_of_week / 24) as u8;
    let hour_of_day = (latest.hour_of_week % 24) as u8;

    Some(NewAnomaly {
        probe_id: latest.probe_id.clone(),
        metric: latest.metric,
        started_at: earliest,
        expected_value: latest.expected_value,
        actual_value: latest.actual_value,
        severity: latest.severity,
        day_of_week,
        hour_of_day,
        description: describe(latest.metric, latest.actual_value, latest.expected_value, day_of_week, hour_of_day),
    })
}

pub fn describe(metric: Metric, actual: f64, expected: f64, day_of_week: u8, hour_of_day: u8) -> String {
    format!(
        "{} {:.1}x higher than normal for {} {}:00",
        metric,
        actual / expected,
        DAY_NAMES[day_of_week as usize % 7],
        hour_of_day
    )
}

/// Counts from one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub opened: usize,
    pub extended: usize,
    pub closed: usize,
    /// Keys skipped because of a store error or a broken invariant.
    pub failed: usize,
}

type Key = (String, Metric);

pub struct LifecycleManager {
    store: Arc<dyn Store>,
    events: EventBus,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Apply one detection pass. A failing key is logged and left untouched
    /// (it is neither extended nor closed); the other keys still proceed.
    pub async fn reconcile(
        &self,
        candidates: &[AnomalyCandidate],
        now: DateTime<Utc>,
    ) -> Result<ReconcileSummary, StoreError> {
        let mut summary = ReconcileSummary::default();

        let mut groups: BTreeMap<Key, Vec<AnomalyCandidate>> = BTreeMap::new();
        for c in candidates {
            groups
                .entry((c.probe_id.clone(), c.metric))
                .or_default()
                .push(c.clone());
        }

        let mut failed: BTreeSet<Key> = BTreeSet::new();
        for (key, group) in &groups {
            match self.apply_group(key, group, now).await {
                Ok(Transition::Open(_)) => summary.opened += 1,
                Ok(Transition::Extend { .. }) => summary.extended += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(probe_id = %key.0, metric = %key.1, error = %e, "anomaly update failed");
                    summary.failed += 1;
                    failed.insert(key.clone());
                }
            }
        }

        // Whatever is still open without candidates this pass has ended.
        let open = self.store.open_anomalies().await?;
        let mut open_per_key: HashMap<Key, usize> = HashMap::new();
        for a in &open {
            *open_per_key.entry((a.probe_id.clone(), a.metric)).or_default() += 1;
        }

        for a in &open {
            let key = (a.probe_id.clone(), a.metric);
            if groups.contains_key(&key) || failed.contains(&key) {
                continue;
            }
            let count = open_per_key.get(&key).copied().unwrap_or(0);
            if count > 1 {
                let e = StoreError::DuplicateOpenAnomaly { probe_id: key.0.clone(), metric: key.1, count };
                error!(anomaly_id = %a.id, error = %e, "refusing to close");
                summary.failed += 1;
                continue;
            }
            if let Transition::Close { id } = transition(Some(a), &[]) {
                match self.store.close_anomaly(id, now).await {
                    Ok(()) => {
                        info!(anomaly_id = %id, probe_id = %a.probe_id, metric = %a.metric, "anomaly closed");
                        summary.closed += 1;
                        self.events.emit(Event::Anomaly(AnomalyEvent {
                            anomaly_id: id,
                            probe_id: a.probe_id.clone(),
                            metric: a.metric,
                            state: AnomalyState::Closed,
                            severity: a.severity,
                            actual_value: a.actual_value,
                            at: now,
                        }));
                    }
                    Err(e) => {
                        error!(anomaly_id = %id, error = %e, "failed to close anomaly");
                        summary.failed += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn apply_group(
        &self,
        key: &Key,
        group: &[AnomalyCandidate],
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let open = self.store.find_open_anomaly(&key.0, key.1).await?;
        let t = transition(open.as_ref(), group);
        match &t {
            Transition::Open(new) => {
                let id = self.store.create_anomaly(new).await?;
                info!(
                    anomaly_id = %id,
                    probe_id = %new.probe_id,
                    metric = %new.metric,
                    severity = %new.severity,
                    "{}",
                    new.description
                );
                self.events.emit(Event::Anomaly(AnomalyEvent {
                    anomaly_id: id,
                    probe_id: new.probe_id.clone(),
                    metric: new.metric,
                    state: AnomalyState::Opened,
                    severity: new.severity,
                    actual_value: new.actual_value,
                    at: now,
                }));
            }
            Transition::Extend { id, actual_value, severity } => {
                self.store.update_anomaly(*id, *actual_value, *severity).await?;
                debug!(anomaly_id = %id, actual_value, %severity, "anomaly extended");
            }
            Transition::Close { .. } | Transition::Idle => {}
        }
        Ok(t)
    }
}
