//! Fixed metric families emitted by the comparison engine and scheduler.

use std::sync::Arc;

use crate::config::MetricsConfig;
use crate::core::{ComparisonOutcome, QueryType};
use crate::error::ErrorKind;

use super::registry::{MetricKind, Registry};
use super::{Labels, MetricsSink};

pub const ROW_COUNT: &str = "db_table_row_count";
pub const COMPARISON_STATUS: &str = "db_table_comparison_status";
pub const ROW_DIFFERENCE: &str = "db_table_row_difference";
pub const COMPARISON_DURATION: &str = "db_table_comparison_duration_seconds";
pub const QUERY_DURATION: &str = "db_query_duration_seconds";
pub const COMPARISON_ERRORS: &str = "db_table_comparison_errors_total";
pub const QUERY_ERRORS: &str = "db_query_errors_total";
pub const CHECKSUM_STATUS: &str = "db_table_checksum_status";
pub const LAST_SUCCESSFUL_COMPARISON: &str = "db_table_last_successful_comparison";
pub const CONNECTION_POOL_USAGE: &str = "db_connection_pool_usage";
pub const WORKER_POOL_USAGE: &str = "db_worker_pool_usage";

pub const COMPARISON_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
pub const QUERY_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

/// Typed front for the metric families, carrying the environment and
/// custom labels appended to every series.
#[derive(Clone)]
pub struct ComparisonMetrics {
    sink: Arc<dyn MetricsSink>,
    environment: String,
    custom: Labels,
}

impl ComparisonMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>, config: &MetricsConfig) -> Self {
        Self {
            sink,
            environment: config.environment.clone(),
            custom: config
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Declare help text, types and buckets for every family.
    pub fn describe(registry: &Registry) {
        use MetricKind::*;
        let families: [(&str, MetricKind, &str, &[f64]); 11] = [
            (ROW_COUNT, Gauge, "Number of rows in table", &[]),
            (
                COMPARISON_STATUS,
                Gauge,
                "Table comparison status (1=match, 0=mismatch, -1=error)",
                &[],
            ),
            (ROW_DIFFERENCE, Gauge, "Row count difference between databases", &[]),
            (
                COMPARISON_DURATION,
                Histogram,
                "Time taken to compare tables",
                COMPARISON_DURATION_BUCKETS,
            ),
            (
                QUERY_DURATION,
                Histogram,
                "Database query execution time",
                QUERY_DURATION_BUCKETS,
            ),
            (COMPARISON_ERRORS, Counter, "Number of comparison errors", &[]),
            (QUERY_ERRORS, Counter, "Number of query errors", &[]),
            (
                CHECKSUM_STATUS,
                Gauge,
                "Checksum comparison status (1=match, 0=mismatch, -1=error)",
                &[],
            ),
            (
                LAST_SUCCESSFUL_COMPARISON,
                Gauge,
                "Timestamp of last successful comparison",
                &[],
            ),
            (CONNECTION_POOL_USAGE, Gauge, "Number of active connections in pool", &[]),
            (WORKER_POOL_USAGE, Gauge, "Number of active worker threads", &[]),
        ];
        for (name, kind, help, buckets) in families {
            registry.describe(name, kind, help, buckets);
        }
    }

    fn labels(&self, fixed: &[(&str, &str)]) -> Labels {
        let mut labels: Labels = fixed
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.push(("environment".to_string(), self.environment.clone()));
        labels.extend(self.custom.iter().cloned());
        labels
    }

    pub fn set_row_count(&self, database: &str, table: &str, count: i64) {
        let labels = self.labels(&[("database", database), ("table", table)]);
        self.sink.set_gauge(ROW_COUNT, &labels, count as f64);
    }

    pub fn set_row_difference(&self, table: &str, difference: i64) {
        let labels = self.labels(&[("table", table)]);
        self.sink.set_gauge(ROW_DIFFERENCE, &labels, difference as f64);
    }

    pub fn set_comparison_status(&self, table: &str, outcome: &ComparisonOutcome) {
        let labels = self.labels(&[("table", table)]);
        self.sink
            .set_gauge(COMPARISON_STATUS, &labels, outcome.status_value());
    }

    pub fn set_checksum_status(&self, table: &str, chunk_id: u64, outcome: &ComparisonOutcome) {
        let chunk = chunk_id.to_string();
        let labels = self.labels(&[("table", table), ("chunk_id", &chunk)]);
        self.sink
            .set_gauge(CHECKSUM_STATUS, &labels, outcome.status_value());
    }

    pub fn set_last_successful_comparison(&self, table: &str, unix_seconds: f64) {
        let labels = self.labels(&[("table", table)]);
        self.sink
            .set_gauge(LAST_SUCCESSFUL_COMPARISON, &labels, unix_seconds);
    }

    pub fn observe_comparison_duration(&self, table: &str, seconds: f64) {
        let labels = self.labels(&[("table", table)]);
        self.sink
            .observe_histogram(COMPARISON_DURATION, &labels, seconds);
    }

    pub fn observe_query_duration(
        &self,
        database: &str,
        table: &str,
        query_type: QueryType,
        seconds: f64,
    ) {
        let labels = self.labels(&[
            ("database", database),
            ("table", table),
            ("query_type", query_type.as_str()),
        ]);
        self.sink.observe_histogram(QUERY_DURATION, &labels, seconds);
    }

    pub fn inc_comparison_error(&self, table: &str, kind: ErrorKind) {
        let labels = self.labels(&[("table", table), ("error_type", kind.as_str())]);
        self.sink.inc_counter(COMPARISON_ERRORS, &labels);
    }

    pub fn inc_query_error(&self, database: &str, table: &str, kind: ErrorKind) {
        let labels = self.labels(&[
            ("database", database),
            ("table", table),
            ("error_type", kind.as_str()),
        ]);
        self.sink.inc_counter(QUERY_ERRORS, &labels);
    }

    pub fn set_connection_pool_usage(&self, database: &str, in_use: usize) {
        let labels = self.labels(&[("database", database)]);
        self.sink
            .set_gauge(CONNECTION_POOL_USAGE, &labels, in_use as f64);
    }

    pub fn set_worker_pool_usage(&self, active: usize) {
        let labels = self.labels(&[]);
        self.sink.set_gauge(WORKER_POOL_USAGE, &labels, active as f64);
    }
}
