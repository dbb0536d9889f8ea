//! Penalty curve breakpoints per metric.

use crate::metrics::Metric;

/// Breakpoints of the 4-segment penalty curve plus the metric's penalty budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricThresholds {
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
    pub critical: f64,
    pub max_penalty: f64,
}

pub fn for_metric(metric: Metric) -> MetricThresholds {
    match metric {
        Metric::Latency => MetricThresholds { good: 30.0, fair: 80.0, poor: 200.0, critical: 500.0, max_penalty: 30.0 },
        Metric::Jitter => MetricThresholds { good: 5.0, fair: 20.0, poor: 50.0, critical: 100.0, max_penalty: 20.0 },
        Metric::PacketLoss => MetricThresholds { good: 0.5, fair: 2.0, poor: 5.0, critical: 10.0, max_penalty: 30.0 },
        Metric::Dns => MetricThresholds { good: 50.0, fair: 150.0, poor: 500.0, critical: 1000.0, max_penalty: 10.0 },
        Metric::Bufferbloat => MetricThresholds { good: 30.0, fair: 100.0, poor: 300.0, critical: 600.0, max_penalty: 10.0 },
    }
}

// Budget fraction reached at the end of each segment.
const FAIR_FRACTION: f64 = 0.33;
const POOR_FRACTION: f64 = 0.75;

impl MetricThresholds {
    /// Raw (unweighted) penalty for `value`, in `[0, max_penalty]`.
    pub fn penalty(&self, value: f64) -> f64 {
        let fraction = if value <= self.good {
            0.0
        } else if value <= self.fair {
            (value - self.good) / (self.fair - self.good) * FAIR_FRACTION
        } else if value <= self.poor {
            FAIR_FRACTION
                + (value - self.fair) / (self.poor - self.fair) * (POOR_FRACTION - FAIR_FRACTION)
        } else if value <= self.critical {
            POOR_FRACTION
                + (value - self.poor) / (self.critical - self.poor) * (1.0 - POOR_FRACTION)
        } else {
            1.0
        };
        fraction * self.max_penalty
    }
}
