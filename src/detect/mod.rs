//! Baselines, anomaly detection, anomaly lifecycle and recurring patterns.

pub mod anomaly;
pub mod baseline;
pub mod engine;
pub mod lifecycle;
pub mod patterns;

use crate::metrics::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use self::engine::DetectionEngine;

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Severity of a deviation from baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mild" => Ok(Severity::Mild),
            "moderate" => Ok(Severity::Moderate),
            "severe" => Ok(Severity::Severe),
            other => anyhow::bail!("unknown severity '{}'", other),
        }
    }
}

/// A persisted anomaly. `ended_at == None` means the anomaly is still open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub id: uuid::Uuid,
    pub probe_id: String,
    pub metric: Metric,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expected_value: f64,
    pub actual_value: f64,
    pub severity: Severity,
    /// 0 = Monday
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub description: String,
}

impl Anomaly {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Fields for a newly opened anomaly.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnomaly {
    pub probe_id: String,
    pub metric: Metric,
    pub started_at: DateTime<Utc>,
    pub expected_value: f64,
    pub actual_value: f64,
    pub severity: Severity,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub description: String,
}
