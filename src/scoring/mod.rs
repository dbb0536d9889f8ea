//! Quality scoring: metric values -> weighted penalties -> 0..100 score and A-F grade.
//!
//! The engine is a pure function. Missing metrics contribute no penalty and are
//! reported as `good`, so "no data" scores the same as perfect data. That gap is
//! known and kept as-is.

pub mod profiles;
pub mod thresholds;

use crate::metrics::{Metric, MetricValues};
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub use self::profiles::Profile;
pub use self::thresholds::MetricThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Good,
    Fair,
    Poor,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricPenalty {
    pub value: f64,
    pub penalty: f64,
    pub status: MetricStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityScore {
    pub score: f64,
    pub grade: Grade,
    pub label: &'static str,
    pub profile: Profile,
    pub breakdown: BTreeMap<Metric, MetricPenalty>,
    pub primary_issue: Option<String>,
}

pub fn status_for(value: f64, t: &MetricThresholds) -> MetricStatus {
    if value <= t.good {
        MetricStatus::Good
    } else if value <= t.fair {
        MetricStatus::Fair
    } else if value <= t.poor {
        MetricStatus::Poor
    } else {
        MetricStatus::Critical
    }
}

pub fn grade_for(score: f64) -> Grade {
    if score >= 90.0 {
        Grade::A
    } else if score >= 80.0 {
        Grade::B
    } else if score >= 65.0 {
        Grade::C
    } else if score >= 45.0 {
        Grade::D
    } else {
        Grade::F
    }
}

pub fn label_for(grade: Grade) -> &'static str {
    match grade {
        Grade::A => "Excellent",
        Grade::B => "Good",
        Grade::C => "Fair",
        Grade::D => "Poor",
        Grade::F => "Failing",
    }
}

fn issue_message(metric: Metric, value: f64) -> String {
    match metric {
        Metric::Latency => format!(
            "High latency ({:.1}ms). Check your connection or try a wired connection.",
            value
        ),
        Metric::Jitter => format!("High jitter ({:.1}ms). Your connection is unstable.", value),
        Metric::PacketLoss => format!("Packet loss ({:.1}%). Check physical connections.", value),
        Metric::Dns => format!(
            "Slow DNS resolution ({:.1}ms). Consider switching to 1.1.1.1 or 8.8.8.8.",
            value
        ),
        Metric::Bufferbloat => format!(
            "Bufferbloat detected ({:.1}ms). Consider enabling SQM/QoS on your router.",
            value
        ),
    }
}

/// Score a set of metric values under a weighting profile.
pub fn compute(values: &MetricValues, profile: Profile) -> QualityScore {
    let mut breakdown = BTreeMap::new();
    let mut total_penalty = 0.0;
    let mut worst: Option<(Metric, f64, f64)> = None;

    for metric in Metric::ALL {
        let Some(value) = values.get(metric) else {
            breakdown.insert(
                metric,
                MetricPenalty { value: 0.0, penalty: 0.0, status: MetricStatus::Good },
            );
            continue;
        };

        let t = thresholds::for_metric(metric);
        let penalty = t.penalty(value) * profile.weight(metric);
        total_penalty += penalty;

        if penalty > worst.map_or(0.0, |(_, _, p)| p) {
            worst = Some((metric, value, penalty));
        }

        breakdown.insert(
            metric,
            MetricPenalty { value, penalty, status: status_for(value, &t) },
        );
    }

    let score = (100.0 - total_penalty).clamp(0.0, 100.0);
    let grade = grade_for(score);

    QualityScore {
        score,
        grade,
        label: label_for(grade),
        profile,
        breakdown,
        primary_issue: worst.map(|(metric, value, _)| issue_message(metric, value)),
    }
}

/// Score a probe from its raw measurements over the trailing `window`.
pub async fn live_score(
    store: &dyn Store,
    probe_id: &str,
    profile: Profile,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<QualityScore, StoreError> {
    let values = store.probe_averages(probe_id, now - window, now).await?;
    Ok(compute(&values, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(latency: f64, jitter: f64, loss: f64, dns: f64, bloat: f64) -> MetricValues {
        MetricValues {
            latency: Some(latency),
            jitter: Some(jitter),
            packet_loss: Some(loss),
            dns: Some(dns),
            bufferbloat: Some(bloat),
        }
    }

    #[test]
    fn test_perfect_connection_is_a() {
        let s = compute(&values(10.0, 1.0, 0.0, 20.0, 5.0), Profile::General);
        assert_eq!(s.score, 100.0);
        assert_eq!(s.grade, Grade::A);
        assert_eq!(s.label, "Excellent");
        assert!(s.primary_issue.is_none());
    }

    #[test]
    fn test_latency_at_good_threshold_has_no_penalty() {
        let s = compute(&MetricValues { latency: Some(30.0), ..Default::default() }, Profile::General);
        let b = &s.breakdown[&Metric::Latency];
        assert_eq!(b.penalty, 0.0);
        assert_eq!(b.status, MetricStatus::Good);
    }

    #[test]
    fn test_latency_at_critical_takes_full_budget() {
        let s = compute(&MetricValues { latency: Some(500.0), ..Default::default() }, Profile::General);
        let b = &s.breakdown[&Metric::Latency];
        assert!((b.penalty - 30.0).abs() < 1e-9);
        assert_eq!(b.status, MetricStatus::Critical);
        assert!((s.score - 70.0).abs() < 1e-9);
        assert_eq!(s.grade, Grade::C);
    }

    #[test]
    fn test_missing_metrics_score_as_good() {
        let s = compute(&MetricValues::default(), Profile::Gaming);
        assert_eq!(s.score, 100.0);
        for metric in Metric::ALL {
            let b = &s.breakdown[&metric];
            assert_eq!(b.value, 0.0);
            assert_eq!(b.status, MetricStatus::Good);
        }
    }

    #[test]
    fn test_score_is_clamped_and_grade_follows_score() {
        for profile in [Profile::General, Profile::Gaming, Profile::VideoCalls, Profile::Streaming] {
            let s = compute(&values(5000.0, 500.0, 80.0, 9000.0, 2000.0), profile);
            assert!(s.score >= 0.0 && s.score <= 100.0);
            assert_eq!(s.grade, grade_for(s.score));
        }
        let worst = compute(&values(5000.0, 500.0, 80.0, 9000.0, 2000.0), Profile::Gaming);
        assert_eq!(worst.score, 0.0);
        assert_eq!(worst.grade, Grade::F);
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(grade_for(90.0), Grade::A);
        assert_eq!(grade_for(89.99), Grade::B);
        assert_eq!(grade_for(80.0), Grade::B);
        assert_eq!(grade_for(65.0), Grade::C);
        assert_eq!(grade_for(45.0), Grade::D);
        assert_eq!(grade_for(44.9), Grade::F);
    }

    #[test]
    fn test_primary_issue_is_largest_weighted_penalty() {
        // Loss 5% -> 0.75 * 30 = 22.5; latency 80ms -> 0.33 * 30 = 9.9
        let s = compute(
            &MetricValues { latency: Some(80.0), packet_loss: Some(5.0), ..Default::default() },
            Profile::General,
        );
        assert_eq!(
            s.primary_issue.as_deref(),
            Some("Packet loss (5.0%). Check physical connections.")
        );
    }

    #[test]
    fn test_profile_weight_changes_primary_issue() {
        // dns 500 -> 7.5 raw, bufferbloat 100 -> 3.3 raw; streaming weights 0.5 and 1.5
        let v = MetricValues { dns: Some(500.0), bufferbloat: Some(100.0), ..Default::default() };
        let general = compute(&v, Profile::General);
        assert!(general.primary_issue.unwrap().starts_with("Slow DNS"));
        let streaming = compute(&v, Profile::Streaming);
        assert!(streaming.primary_issue.unwrap().starts_with("Bufferbloat detected (100.0ms)"));
    }
}
