//! In-process event fan-out for a live-streaming consumer.
//!
//! Emission never blocks and never fails: with no subscribers the event is dropped,
//! and a slow subscriber loses the oldest events (tokio broadcast semantics).

use crate::alerts::AlertPayload;
use crate::detect::Severity;
use crate::metrics::Metric;
use crate::storage::Measurement;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyState {
    Opened,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub anomaly_id: uuid::Uuid,
    pub probe_id: String,
    pub metric: Metric,
    pub state: AnomalyState,
    pub severity: Severity,
    pub actual_value: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Measurement(Measurement),
    Anomaly(AnomalyEvent),
    Alert(AlertPayload),
}

impl Event {
    /// Probe the event belongs to. Alerts spanning all probes have none.
    pub fn probe_id(&self) -> Option<&str> {
        match self {
            Event::Measurement(m) => Some(&m.probe_id),
            Event::Anomaly(a) => Some(&a.probe_id),
            Event::Alert(a) => a.probe_id.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValues;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(Event::Measurement(Measurement {
            probe_id: "a".into(),
            time: Utc::now(),
            values: MetricValues::default(),
        }));
    }

    #[tokio::test]
    async fn test_subscriber_receives_tagged_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Event::Measurement(Measurement {
            probe_id: "probe-7".into(),
            time: Utc::now(),
            values: MetricValues { latency: Some(12.5), ..Default::default() },
        }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.probe_id(), Some("probe-7"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "measurement");
        assert_eq!(json["data"]["latency"], 12.5);
    }
}
