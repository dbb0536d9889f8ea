//! The five connection-quality metrics and the per-metric constants shared by
//! the detector, the alert evaluator and the scoring engine.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A monitored connection-quality metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Latency,
    Jitter,
    PacketLoss,
    Dns,
    Bufferbloat,
}

/// How a live aggregate is reduced over the alert window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Max,
}

impl Aggregation {
    pub fn sql(&self) -> &'static str {
        match self {
            Aggregation::Avg => "AVG",
            Aggregation::Max => "MAX",
        }
    }
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Latency,
        Metric::Jitter,
        Metric::PacketLoss,
        Metric::Dns,
        Metric::Bufferbloat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Latency => "latency",
            Metric::Jitter => "jitter",
            Metric::PacketLoss => "packet_loss",
            Metric::Dns => "dns",
            Metric::Bufferbloat => "bufferbloat",
        }
    }

    /// Column holding this metric in the raw `measurements` table.
    pub fn raw_column(&self) -> &'static str {
        match self {
            Metric::Latency => "latency_avg",
            Metric::Jitter => "jitter",
            Metric::PacketLoss => "packet_loss",
            Metric::Dns => "dns_time",
            Metric::Bufferbloat => "bufferbloat",
        }
    }

    /// Column holding this metric in the `measurements_5min` rollup table.
    pub fn rollup_column(&self) -> &'static str {
        match self {
            Metric::Latency => "latency_avg",
            Metric::Jitter => "jitter_avg",
            Metric::PacketLoss => "packet_loss_avg",
            Metric::Dns => "dns_time_avg",
            Metric::Bufferbloat => "bufferbloat_avg",
        }
    }

    /// Absolute floor below which a statistical deviation is never flagged.
    pub fn minimum_concern(&self) -> f64 {
        match self {
            Metric::Latency => 50.0,
            Metric::Jitter => 10.0,
            Metric::PacketLoss => 1.0,
            Metric::Dns => 100.0,
            Metric::Bufferbloat => 50.0,
        }
    }

    /// Loss spikes must not be averaged away; everything else is steady-state.
    pub fn live_aggregation(&self) -> Aggregation {
        match self {
            Metric::PacketLoss => Aggregation::Max,
            _ => Aggregation::Avg,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::PacketLoss => "%",
            _ => "ms",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown metric '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// One optional value per metric. `None` means no samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub latency: Option<f64>,
    pub jitter: Option<f64>,
    pub packet_loss: Option<f64>,
    pub dns: Option<f64>,
    pub bufferbloat: Option<f64>,
}

impl MetricValues {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Latency => self.latency,
            Metric::Jitter => self.jitter,
            Metric::PacketLoss => self.packet_loss,
            Metric::Dns => self.dns,
            Metric::Bufferbloat => self.bufferbloat,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        match metric {
            Metric::Latency => self.latency = value,
            Metric::Jitter => self.jitter = value,
            Metric::PacketLoss => self.packet_loss = value,
            Metric::Dns => self.dns = value,
            Metric::Bufferbloat => self.bufferbloat = value,
        }
    }
}
