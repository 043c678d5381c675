//! Metric recording and Prometheus exposition.
//!
//! - [`MetricsSink`]: where observations go
//! - [`Registry`]: in-process sink that renders the text exposition format
//! - [`ComparisonMetrics`]: the fixed metric families emitted by the engine

mod collector;
mod registry;

pub use collector::*;
pub use registry::{MetricKind, MetricsSnapshot, Registry, Sample, SampleValue};

/// Ordered label pairs attached to one observation.
pub type Labels = Vec<(String, String)>;

/// Destination for metric observations.
///
/// Implementations must be safe to call from many tasks at once.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, name: &str, labels: &[(String, String)], value: f64);

    fn inc_counter(&self, name: &str, labels: &[(String, String)]);

    fn observe_histogram(&self, name: &str, labels: &[(String, String)], value: f64);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn set_gauge(&self, _name: &str, _labels: &[(String, String)], _value: f64) {}

    fn inc_counter(&self, _name: &str, _labels: &[(String, String)]) {}

    fn observe_histogram(&self, _name: &str, _labels: &[(String, String)], _value: f64) {}
}
