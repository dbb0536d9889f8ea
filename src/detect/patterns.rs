//! Recurring weekly degradation: closed anomalies that keep landing on the
//! same weekday and hour.

use crate::detect::{Anomaly, DAY_NAMES};
use crate::metrics::Metric;
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringPattern {
    pub probe_id: String,
    pub metric: Metric,
    pub day_of_week: u8,
    /// First hour of the range.
    pub hour_of_day: u8,
    /// Hour the range ends at, exclusive, wrapped at 24.
    pub end_hour: u8,
    pub occurrences: u32,
    pub avg_expected: f64,
    pub avg_actual: f64,
    pub description: String,
}

impl RecurringPattern {
    fn from_slot(key: &SlotKey, acc: &SlotAcc) -> Self {
        let (probe_id, metric, day_of_week, hour_of_day) = key.clone();
        let n = acc.count as f64;
        let end_hour = (hour_of_day + 1) % 24;
        Self {
            description: describe(metric, day_of_week, hour_of_day, end_hour),
            probe_id,
            metric,
            day_of_week,
            hour_of_day,
            end_hour,
            occurrences: acc.count,
            avg_expected: acc.expected_sum / n,
            avg_actual: acc.actual_sum / n,
        }
    }
}

fn describe(metric: Metric, day_of_week: u8, start: u8, end: u8) -> String {
    format!(
        "{} degrades every {} {}:00-{}:00",
        metric,
        DAY_NAMES[day_of_week as usize % 7],
        start,
        end
    )
}

type SlotKey = (String, Metric, u8, u8);

#[derive(Default)]
struct SlotAcc {
    count: u32,
    expected_sum: f64,
    actual_sum: f64,
}

/// Group closed anomalies by (probe, metric, weekday, hour), keep slots seen at
/// least `min_occurrences` times, then merge runs of adjacent hours.
pub fn find_patterns(anomalies: &[Anomaly], min_occurrences: u32) -> Vec<RecurringPattern> {
    let mut slots: BTreeMap<SlotKey, SlotAcc> = BTreeMap::new();
    for a in anomalies.iter().filter(|a| !a.is_open()) {
        let acc = slots
            .entry((a.probe_id.clone(), a.metric, a.day_of_week, a.hour_of_day))
            .or_default();
        acc.count += 1;
        acc.expected_sum += a.expected_value;
        acc.actual_sum += a.actual_value;
    }

    let hourly: Vec<RecurringPattern> = slots
        .iter()
        .filter(|(_, acc)| acc.count >= min_occurrences)
        .map(|(key, acc)| RecurringPattern::from_slot(key, acc))
        .collect();

    merge_adjacent(hourly)
}

/// Coalesce consecutive hours of the same (probe, metric, weekday) into one
/// range. A merged range takes the larger occurrence count of its first and
/// last hour and the plain mean of their averages.
pub fn merge_adjacent(patterns: Vec<RecurringPattern>) -> Vec<RecurringPattern> {
    let mut groups: BTreeMap<(String, Metric, u8), Vec<RecurringPattern>> = BTreeMap::new();
    for p in patterns {
        groups
            .entry((p.probe_id.clone(), p.metric, p.day_of_week))
            .or_default()
            .push(p);
    }

    let mut merged = Vec::new();
    for (_, mut group) in groups {
        group.sort_by_key(|p| p.hour_of_day);
        let mut iter = group.into_iter();
        let Some(first) = iter.next() else { continue };

        let mut start = first.clone();
        let mut end = first;
        for p in iter {
            if p.hour_of_day == end.hour_of_day + 1 {
                end = p;
            } else {
                merged.push(span(&start, &end));
                start = p.clone();
                end = p;
            }
        }
        merged.push(span(&start, &end));
    }
    merged
}

fn span(start: &RecurringPattern, end: &RecurringPattern) -> RecurringPattern {
    let end_hour = (end.hour_of_day + 1) % 24;
    RecurringPattern {
        probe_id: start.probe_id.clone(),
        metric: start.metric,
        day_of_week: start.day_of_week,
        hour_of_day: start.hour_of_day,
        end_hour,
        occurrences: start.occurrences.max(end.occurrences),
        avg_expected: (start.avg_expected + end.avg_expected) / 2.0,
        avg_actual: (start.avg_actual + end.avg_actual) / 2.0,
        description: describe(start.metric, start.day_of_week, start.hour_of_day, end_hour),
    }
}

/// Scan closed anomalies that started after `since`.
pub async fn detect_recurring_patterns(
    store: &dyn Store,
    since: DateTime<Utc>,
    min_occurrences: u32,
) -> Result<Vec<RecurringPattern>, StoreError> {
    let closed = store.closed_anomalies_since(since).await?;
    Ok(find_patterns(&closed, min_occurrences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;
    use chrono::{TimeDelta, TimeZone};
    use uuid::Uuid;

    fn closed(probe: &str, metric: Metric, day: u8, hour: u8, expected: f64, actual: f64) -> Anomaly {
        let started = Utc.with_ymd_and_hms(2024, 1, 2, hour as u32, 0, 0).unwrap();
        Anomaly {
            id: Uuid::new_v4(),
            probe_id: probe.into(),
            metric,
            started_at: started,
            ended_at: Some(started + TimeDelta::minutes(20)),
            expected_value: expected,
            actual_value: actual,
            severity: Severity::Moderate,
            day_of_week: day,
            hour_of_day: hour,
            description: String::new(),
        }
    }

    fn repeat(n: usize, a: impl Fn() -> Anomaly) -> Vec<Anomaly> {
        (0..n).map(|_| a()).collect()
    }

    #[test]
    fn test_adjacent_hours_merge_into_range() {
        let mut anomalies = repeat(3, || closed("a", Metric::Latency, 1, 21, 20.0, 80.0));
        anomalies.extend(repeat(4, || closed("a", Metric::Latency, 1, 22, 30.0, 100.0)));

        let patterns = find_patterns(&anomalies, 3);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.description, "latency degrades every Tuesday 21:00-23:00");
        assert_eq!(p.hour_of_day, 21);
        assert_eq!(p.end_hour, 23);
        assert_eq!(p.occurrences, 4);
        assert_eq!(p.avg_expected, 25.0);
        assert_eq!(p.avg_actual, 90.0);
    }

    #[test]
    fn test_below_minimum_and_open_are_ignored() {
        let mut anomalies = repeat(2, || closed("a", Metric::Jitter, 0, 9, 3.0, 30.0));
        let mut open = closed("a", Metric::Jitter, 0, 9, 3.0, 30.0);
        open.ended_at = None;
        anomalies.push(open);

        assert!(find_patterns(&anomalies, 3).is_empty());
    }

    #[test]
    fn test_gaps_stay_separate_and_midnight_wraps() {
        let mut anomalies = repeat(3, || closed("a", Metric::Dns, 6, 8, 20.0, 200.0));
        anomalies.extend(repeat(3, || closed("a", Metric::Dns, 6, 10, 20.0, 200.0)));
        anomalies.extend(repeat(3, || closed("a", Metric::Dns, 6, 23, 20.0, 200.0)));
        // Same hour on another probe is its own pattern
        anomalies.extend(repeat(3, || closed("b", Metric::Dns, 6, 8, 20.0, 200.0)));

        let patterns = find_patterns(&anomalies, 3);
        let descriptions: Vec<_> = patterns.iter().map(|p| (p.probe_id.as_str(), p.description.as_str())).collect();
        assert_eq!(
            descriptions,
            vec![
                ("a", "dns degrades every Sunday 8:00-9:00"),
                ("a", "dns degrades every Sunday 10:00-11:00"),
                ("a", "dns degrades every Sunday 23:00-0:00"),
                ("b", "dns degrades every Sunday 8:00-9:00"),
            ]
        );
    }

    #[test]
    fn test_three_hour_run_averages_endpoints() {
        let mut anomalies = repeat(3, || closed("a", Metric::Latency, 4, 18, 10.0, 60.0));
        anomalies.extend(repeat(5, || closed("a", Metric::Latency, 4, 19, 50.0, 500.0)));
        anomalies.extend(repeat(3, || closed("a", Metric::Latency, 4, 20, 30.0, 100.0)));

        let patterns = find_patterns(&anomalies, 3);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].description, "latency degrades every Friday 18:00-21:00");
        // Only the first and last hour feed the merged figures
        assert_eq!(patterns[0].occurrences, 3);
        assert_eq!(patterns[0].avg_expected, 20.0);
        assert_eq!(patterns[0].avg_actual, 80.0);
    }
}
