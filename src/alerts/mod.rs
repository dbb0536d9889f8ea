//! Threshold alerting: evaluation with cooldown and multi-channel notification.

pub mod channels;
pub mod evaluate;
pub mod notify;

use crate::metrics::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use self::evaluate::AlertEvaluator;
pub use self::notify::{NotificationTarget, Notifier, NotifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => "gt",
            Comparison::Lt => "lt",
            Comparison::Gte => "gte",
            Comparison::Lte => "lte",
        }
    }

    /// Whether `actual` breaches `threshold` under this operator.
    pub fn breached(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => actual > threshold,
            Comparison::Lt => actual < threshold,
            Comparison::Gte => actual >= threshold,
            Comparison::Lte => actual <= threshold,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Comparison::Gt),
            "lt" => Ok(Comparison::Lt),
            "gte" => Ok(Comparison::Gte),
            "lte" => Ok(Comparison::Lte),
            other => anyhow::bail!("unknown comparison '{}'", other),
        }
    }
}

/// A user-defined alert rule. Owned by the configuration store; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub id: String,
    /// `None` applies the rule across all probes.
    pub probe_id: Option<String>,
    pub metric: Metric,
    pub threshold: f64,
    pub comparison: Comparison,
    pub duration_min: u32,
    /// `webhook`, `discord` or `email`. Kept as stored so unknown channels can
    /// be reported rather than rejected at load time.
    pub channel: String,
    pub channel_config: serde_json::Value,
    pub is_active: bool,
}

/// Body of a fired alert, shared by every channel and the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub probe_id: Option<String>,
    pub metric: Metric,
    pub threshold: f64,
    pub current_value: f64,
    pub comparison: Comparison,
    pub duration_min: u32,
    pub message: String,
    pub fired_at: DateTime<Utc>,
}

impl AlertPayload {
    pub fn new(config: &AlertConfig, current_value: f64, fired_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: config.id.clone(),
            probe_id: config.probe_id.clone(),
            metric: config.metric,
            threshold: config.threshold,
            current_value,
            comparison: config.comparison,
            duration_min: config.duration_min,
            message: format_message(config, current_value),
            fired_at,
        }
    }
}

pub fn format_message(config: &AlertConfig, current_value: f64) -> String {
    format!(
        "{} {} {} for {} minutes (current: {:.2})",
        config.metric, config.comparison, config.threshold, config.duration_min, current_value
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons() {
        assert!(Comparison::Gt.breached(101.0, 100.0));
        assert!(!Comparison::Gt.breached(100.0, 100.0));
        assert!(Comparison::Gte.breached(100.0, 100.0));
        assert!(Comparison::Lt.breached(0.5, 1.0));
        assert!(!Comparison::Lt.breached(1.0, 1.0));
        assert!(Comparison::Lte.breached(1.0, 1.0));
    }

    #[test]
    fn test_message_format() {
        let config = AlertConfig {
            id: "a1".into(),
            probe_id: None,
            metric: Metric::PacketLoss,
            threshold: 2.0,
            comparison: Comparison::Gt,
            duration_min: 5,
            channel: "webhook".into(),
            channel_config: serde_json::json!({}),
            is_active: true,
        };
        assert_eq!(
            format_message(&config, 3.456),
            "packet_loss gt 2 for 5 minutes (current: 3.46)"
        );
    }
}
