//! In-process metric registry.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::MetricsSink;

/// Histogram buckets for families observed before being described.
const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

type LabelSet = Vec<(String, String)>;

#[derive(Debug, Clone)]
enum Series {
    Value(f64),
    Histogram {
        /// Per-bucket (non-cumulative) counts; the last slot is +Inf.
        counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

#[derive(Debug)]
struct Family {
    kind: MetricKind,
    help: String,
    buckets: Vec<f64>,
    series: BTreeMap<LabelSet, Series>,
}

impl Family {
    fn new(kind: MetricKind, help: &str, buckets: &[f64]) -> Self {
        Self {
            kind,
            help: help.to_string(),
            buckets: buckets.to_vec(),
            series: BTreeMap::new(),
        }
    }
}

/// Acquire locks while recovering from poisoning; a panicked writer
/// leaves at worst one stale sample behind.
trait RwLockExt<T> {
    fn read_recovered(&self) -> RwLockReadGuard<'_, T>;
    fn write_recovered(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_recovered(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_recovered(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Thread-safe store of metric families.
///
/// Families keep the last value per label set, so the exposition always
/// shows the last known state even after a failed run.
#[derive(Debug, Default)]
pub struct Registry {
    families: RwLock<BTreeMap<String, Family>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a family's type, help text and (for histograms) buckets.
    pub fn describe(&self, name: &str, kind: MetricKind, help: &str, buckets: &[f64]) {
        let mut families = self.families.write_recovered();
        families
            .entry(name.to_string())
            .or_insert_with(|| Family::new(kind, help, buckets));
    }

    fn with_family<F>(&self, name: &str, kind: MetricKind, f: F)
    where
        F: FnOnce(&mut Family),
    {
        let mut families = self.families.write_recovered();
        let family = families
            .entry(name.to_string())
            .or_insert_with(|| Family::new(kind, "", DEFAULT_BUCKETS));
        f(family);
    }

    /// Render all families in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let families = self.families.read_recovered();
        let mut out = String::new();

        for (name, family) in families.iter() {
            if family.series.is_empty() {
                continue;
            }
            if !family.help.is_empty() {
                let _ = writeln!(out, "# HELP {} {}", name, escape_help(&family.help));
            }
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind.as_str());

            for (labels, series) in &family.series {
                match series {
                    Series::Value(v) => {
                        let _ = writeln!(out, "{}{} {}", name, format_labels(labels, None), format_value(*v));
                    }
                    Series::Histogram { counts, sum, count } => {
                        let mut cumulative = 0;
                        for (i, bucket_count) in counts.iter().enumerate() {
                            cumulative += bucket_count;
                            let le = family
                                .buckets
                                .get(i)
                                .map(|b| format_value(*b))
                                .unwrap_or_else(|| "+Inf".to_string());
                            let _ = writeln!(
                                out,
                                "{}_bucket{} {}",
                                name,
                                format_labels(labels, Some(&le)),
                                cumulative
                            );
                        }
                        let _ = writeln!(out, "{}_sum{} {}", name, format_labels(labels, None), format_value(*sum));
                        let _ = writeln!(out, "{}_count{} {}", name, format_labels(labels, None), count);
                    }
                }
            }
            out.push('\n');
        }

        out
    }

    /// Copy of every current sample.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let families = self.families.read_recovered();
        let mut samples = Vec::new();
        for (name, family) in families.iter() {
            for (labels, series) in &family.series {
                let value = match series {
                    Series::Value(v) => SampleValue::Value(*v),
                    Series::Histogram { sum, count, .. } => SampleValue::Histogram {
                        sum: *sum,
                        count: *count,
                    },
                };
                samples.push(Sample {
                    name: name.clone(),
                    labels: labels.clone(),
                    value,
                });
            }
        }
        MetricsSnapshot { samples }
    }
}

impl MetricsSink for Registry {
    fn set_gauge(&self, name: &str, labels: &[(String, String)], value: f64) {
        self.with_family(name, MetricKind::Gauge, |family| {
            family.series.insert(labels.to_vec(), Series::Value(value));
        });
    }

    fn inc_counter(&self, name: &str, labels: &[(String, String)]) {
        self.with_family(name, MetricKind::Counter, |family| {
            let series = family
                .series
                .entry(labels.to_vec())
                .or_insert(Series::Value(0.0));
            if let Series::Value(v) = series {
                *v += 1.0;
            }
        });
    }

    fn observe_histogram(&self, name: &str, labels: &[(String, String)], value: f64) {
        self.with_family(name, MetricKind::Histogram, |family| {
            let slots = family.buckets.len() + 1;
            let slot = family
                .buckets
                .iter()
                .position(|b| value <= *b)
                .unwrap_or(family.buckets.len());
            let series = family
                .series
                .entry(labels.to_vec())
                .or_insert_with(|| Series::Histogram {
                    counts: vec![0; slots],
                    sum: 0.0,
                    count: 0,
                });
            if let Series::Histogram { counts, sum, count } = series {
                counts[slot] += 1;
                *sum += value;
                *count += 1;
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Value(f64),
    Histogram { sum: f64, count: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: SampleValue,
}

impl Sample {
    fn matches(&self, name: &str, selector: &[(&str, &str)]) -> bool {
        self.name == name
            && selector
                .iter()
                .all(|(k, v)| self.labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub samples: Vec<Sample>,
}

impl MetricsSnapshot {
    /// Value of the first gauge or counter series whose labels include `selector`.
    pub fn value(&self, name: &str, selector: &[(&str, &str)]) -> Option<f64> {
        self.samples
            .iter()
            .filter(|s| s.matches(name, selector))
            .find_map(|s| match s.value {
                SampleValue::Value(v) => Some(v),
                SampleValue::Histogram { .. } => None,
            })
    }

    /// Total observations across histogram series whose labels include `selector`.
    pub fn histogram_count(&self, name: &str, selector: &[(&str, &str)]) -> u64 {
        self.samples
            .iter()
            .filter(|s| s.matches(name, selector))
            .map(|s| match s.value {
                SampleValue::Histogram { count, .. } => count,
                SampleValue::Value(_) => 0,
            })
            .sum()
    }

    /// Number of series in a family whose labels include `selector`.
    pub fn series_count(&self, name: &str, selector: &[(&str, &str)]) -> usize {
        self.samples
            .iter()
            .filter(|s| s.matches(name, selector))
            .count()
    }
}

fn format_labels(labels: &[(String, String)], le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{}\"", le));
    }
    format!("{{{}}}", parts.join(","))
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        v.to_string()
    }
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let registry = Registry::new();
        registry.describe("status", MetricKind::Gauge, "Status", &[]);
        let l = labels(&[("table", "orders")]);
        registry.set_gauge("status", &l, 1.0);
        registry.set_gauge("status", &l, -1.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.value("status", &[("table", "orders")]), Some(-1.0));
        assert_eq!(snapshot.series_count("status", &[]), 1);
    }

    #[test]
    fn test_counter_increments() {
        let registry = Registry::new();
        let l = labels(&[("table", "orders"), ("error_type", "QueryError")]);
        registry.inc_counter("errors_total", &l);
        registry.inc_counter("errors_total", &l);
        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot.value("errors_total", &[("error_type", "QueryError")]),
            Some(2.0)
        );
    }

    #[test]
    fn test_histogram_render_is_cumulative() {
        let registry = Registry::new();
        registry.describe("latency_seconds", MetricKind::Histogram, "Latency", &[1.0, 5.0]);
        let l = labels(&[("table", "t")]);
        registry.observe_histogram("latency_seconds", &l, 0.5);
        registry.observe_histogram("latency_seconds", &l, 3.0);
        registry.observe_histogram("latency_seconds", &l, 9.0);

        let text = registry.render();
        assert!(text.contains("# HELP latency_seconds Latency"));
        assert!(text.contains("# TYPE latency_seconds histogram"));
        assert!(text.contains("latency_seconds_bucket{table=\"t\",le=\"1\"} 1"));
        assert!(text.contains("latency_seconds_bucket{table=\"t\",le=\"5\"} 2"));
        assert!(text.contains("latency_seconds_bucket{table=\"t\",le=\"+Inf\"} 3"));
        assert!(text.contains("latency_seconds_sum{table=\"t\"} 12.5"));
        assert!(text.contains("latency_seconds_count{table=\"t\"} 3"));
        assert_eq!(
            registry.snapshot().histogram_count("latency_seconds", &[("table", "t")]),
            3
        );
    }

    #[test]
    fn test_render_skips_empty_families_and_escapes() {
        let registry = Registry::new();
        registry.describe("unused", MetricKind::Gauge, "Never set", &[]);
        registry.set_gauge("g", &labels(&[("table", "a\"b")]), 2.0);

        let text = registry.render();
        assert!(!text.contains("unused"));
        assert!(text.contains("# TYPE g gauge"));
        assert!(text.contains("g{table=\"a\\\"b\"} 2"));
    }

    #[test]
    fn test_unlabelled_series() {
        let registry = Registry::new();
        registry.set_gauge("workers", &[], 3.0);
        assert!(registry.render().contains("workers 3\n"));
    }
}
