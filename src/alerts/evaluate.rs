use crate::alerts::{AlertConfig, AlertPayload, Notifier};
use crate::events::{Event, EventBus};
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Checks every active alert rule against live measurements.
///
/// Owns the cooldown map. The map lives as long as the evaluator, so a
/// restart forgets it and a persisting breach may fire again early.
pub struct AlertEvaluator {
    store: Arc<dyn Store>,
    notifier: Notifier,
    events: EventBus,
    cooldown: Duration,
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, events: EventBus, cooldown: Duration) -> Self {
        Self {
            store,
            notifier,
            events,
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    pub fn in_cooldown(&self, alert_id: &str, now: DateTime<Utc>) -> bool {
        self.last_fired
            .get(alert_id)
            .is_some_and(|fired| now - *fired < self.cooldown)
    }

    pub fn reset_cooldowns(&mut self) {
        self.last_fired.clear();
    }

    /// One evaluation pass. Returns how many rules fired.
    ///
    /// A rule whose query fails is logged and skipped. Notifications for the
    /// rules that fired go out concurrently and their failures are swallowed.
    pub async fn evaluate(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let configs = self.store.active_alert_configs().await?;

        let mut fired: Vec<(AlertConfig, AlertPayload)> = Vec::new();
        for config in configs {
            if self.in_cooldown(&config.id, now) {
                debug!(alert_id = %config.id, "in cooldown");
                continue;
            }
            match self.breach(&config, now).await {
                Ok(Some(value)) => {
                    self.last_fired.insert(config.id.clone(), now);
                    let payload = AlertPayload::new(&config, value, now);
                    info!(alert_id = %config.id, metric = %config.metric, "{}", payload.message);
                    fired.push((config, payload));
                }
                Ok(None) => {}
                Err(e) => {
                    error!(alert_id = %config.id, error = %e, "alert evaluation failed");
                }
            }
        }

        let notifier = &self.notifier;
        join_all(fired.iter().map(|(config, payload)| notifier.dispatch(config, payload))).await;

        for (_, payload) in &fired {
            self.events.emit(Event::Alert(payload.clone()));
        }
        Ok(fired.len())
    }

    /// The live aggregate if it breaches the rule, `None` when it doesn't or
    /// there were no samples.
    async fn breach(&self, config: &AlertConfig, now: DateTime<Utc>) -> Result<Option<f64>, StoreError> {
        let from = now - Duration::minutes(i64::from(config.duration_min));
        let live = self
            .store
            .live_aggregate(config.metric, from, now, config.probe_id.as_deref())
            .await?;

        if live.sample_count == 0 {
            return Ok(None);
        }
        Ok(live
            .value
            .filter(|v| v.is_finite() && config.comparison.breached(*v, config.threshold)))
    }
}
