//! Scores recent rollups against the hour-of-week baseline.

use crate::detect::baseline::{BaselineBucket, BaselineSnapshot};
use crate::detect::Severity;
use crate::metrics::Metric;
use crate::storage::Rollup;
use chrono::{DateTime, Utc};

/// Deviation (in standard deviations) above which a value is a candidate.
pub const CANDIDATE_SIGMA: f64 = 2.0;
const MODERATE_SIGMA: f64 = 3.0;
const SEVERE_SIGMA: f64 = 4.0;

/// A single out-of-baseline observation from one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyCandidate {
    pub probe_id: String,
    pub metric: Metric,
    pub bucket_time: DateTime<Utc>,
    pub expected_value: f64,
    pub actual_value: f64,
    pub severity: Severity,
    pub hour_of_week: u16,
}

pub fn classify_severity(value: f64, mean: f64, stddev: f64) -> Severity {
    let deviation = (value - mean).abs();
    if deviation > SEVERE_SIGMA * stddev {
        Severity::Severe
    } else if deviation > MODERATE_SIGMA * stddev {
        Severity::Moderate
    } else {
        Severity::Mild
    }
}

/// Judge one value against its bucket. Returns the severity if the value is
/// both statistically significant and above the metric's absolute floor.
///
/// Buckets with too few samples or a zero stddev cannot produce a meaningful
/// deviation and never flag anything.
pub fn check_value(
    bucket: &BaselineBucket,
    value: f64,
    min_samples: u64,
) -> Option<Severity> {
    if bucket.sample_count < min_samples || bucket.stddev == 0.0 || !value.is_finite() {
        return None;
    }
    let deviation = (value - bucket.mean).abs();
    if deviation > CANDIDATE_SIGMA * bucket.stddev && value > bucket.metric.minimum_concern() {
        Some(classify_severity(value, bucket.mean, bucket.stddev))
    } else {
        None
    }
}

/// Compare recent rollups against the snapshot. Candidates come out in
/// bucket-time order, so a (probe, metric) may appear once per bucket.
pub fn detect_candidates(
    snapshot: &BaselineSnapshot,
    rollups: &[Rollup],
    min_samples: u64,
) -> Vec<AnomalyCandidate> {
    let mut ordered: Vec<&Rollup> = rollups.iter().collect();
    ordered.sort_by_key(|r| r.bucket);

    let mut candidates = Vec::new();
    for rollup in ordered {
        let how = rollup.hour_of_week();
        for metric in Metric::ALL {
            let Some(value) = rollup.values.get(metric) else {
                continue;
            };
            let Some(bucket) = snapshot.get(&rollup.probe_id, metric, how) else {
                continue;
            };
            if let Some(severity) = check_value(bucket, value, min_samples) {
                candidates.push(AnomalyCandidate {
                    probe_id: rollup.probe_id.clone(),
                    metric,
                    bucket_time: rollup.bucket,
                    expected_value: bucket.mean,
                    actual_value: value,
                    severity,
                    hour_of_week: how,
                });
            }
        }
    }
    candidates
}
