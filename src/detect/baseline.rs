//! Time-of-week baselines learned from 5-minute rollups.

use crate::metrics::Metric;
use crate::storage::Rollup;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub const HOURS_PER_WEEK: u16 = 168;

/// Hour-of-week key: `(iso_weekday - 1) * 24 + hour`, Monday 00:00 = 0.
pub fn hour_of_week(t: DateTime<Utc>) -> u16 {
    (t.weekday().number_from_monday() as u16 - 1) * 24 + t.hour() as u16
}

/// A simple time series for population statistics.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance (divides by N, not N-1).
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Learned normal behaviour of one metric for one probe at one hour of the week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineBucket {
    pub probe_id: String,
    pub metric: Metric,
    pub hour_of_week: u16,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: u64,
}

type BucketKey = (String, Metric, u16);

/// Immutable set of baseline buckets produced by one full recompute.
#[derive(Debug, Clone, Default)]
pub struct BaselineSnapshot {
    buckets: HashMap<BucketKey, BaselineBucket>,
    computed_at: Option<DateTime<Utc>>,
}

impl BaselineSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, probe_id: &str, metric: Metric, hour_of_week: u16) -> Option<&BaselineBucket> {
        self.buckets.get(&(probe_id.to_string(), metric, hour_of_week))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn computed_at(&self) -> Option<DateTime<Utc>> {
        self.computed_at
    }

    pub fn buckets(&self) -> impl Iterator<Item = &BaselineBucket> {
        self.buckets.values()
    }

    /// Number of distinct probes covered.
    pub fn probe_count(&self) -> usize {
        let mut probes: Vec<&str> = self.buckets.keys().map(|(p, _, _)| p.as_str()).collect();
        probes.sort_unstable();
        probes.dedup();
        probes.len()
    }
}

/// Build a fresh snapshot from rollups. Every (probe, metric, hour-of-week)
/// with at least one non-null value gets a bucket, however few samples it has.
pub fn compute_baselines(rollups: &[Rollup], computed_at: DateTime<Utc>) -> BaselineSnapshot {
    let mut grouped: HashMap<BucketKey, Vec<f64>> = HashMap::new();

    for rollup in rollups {
        let how = rollup.hour_of_week();
        for metric in Metric::ALL {
            if let Some(v) = rollup.values.get(metric).filter(|v| v.is_finite()) {
                grouped
                    .entry((rollup.probe_id.clone(), metric, how))
                    .or_default()
                    .push(v);
            }
        }
    }

    let buckets = grouped
        .into_iter()
        .map(|(key, values)| {
            let ts = TimeSeries::new(values);
            let bucket = BaselineBucket {
                probe_id: key.0.clone(),
                metric: key.1,
                hour_of_week: key.2,
                mean: ts.mean(),
                stddev: ts.std_dev(),
                sample_count: ts.len() as u64,
            };
            (key, bucket)
        })
        .collect();

    BaselineSnapshot { buckets, computed_at: Some(computed_at) }
}
