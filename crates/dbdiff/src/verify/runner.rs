//! Scoped query execution with timing and error accounting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::schema::TableSpec;
use crate::core::traits::{ConnectionProvider, Query};
use crate::core::value::Row;
use crate::error::{DiffError, Result};
use crate::metrics::ComparisonMetrics;

use super::query::QueryBuilder;

/// One side of the comparison: a provider plus the schema holding the tables.
#[derive(Clone)]
pub struct Side {
    pub provider: Arc<dyn ConnectionProvider>,
    pub schema: String,
}

impl Side {
    pub fn new(provider: Arc<dyn ConnectionProvider>, schema: impl Into<String>) -> Self {
        Self {
            provider,
            schema: schema.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn queries<'a>(&'a self, table: &'a TableSpec) -> QueryBuilder<'a> {
        QueryBuilder::new(self.provider.dialect(), &self.schema, table)
    }
}

/// Runs single statements: acquire, execute, read everything, release.
///
/// No connection is held across statements.
#[derive(Clone)]
pub struct QueryRunner {
    metrics: ComparisonMetrics,
    timeout: Duration,
}

impl QueryRunner {
    pub fn new(metrics: ComparisonMetrics, timeout: Duration) -> Self {
        Self { metrics, timeout }
    }

    pub async fn run(&self, side: &Side, query: &Query) -> Result<Vec<Row>> {
        let started = Instant::now();
        let result = self.execute(side, query).await;

        match &result {
            Ok(rows) => {
                let elapsed = started.elapsed().as_secs_f64();
                debug!(
                    "{} {} {} on {}: {} rows in {:.3}s",
                    query.table,
                    query.query_type,
                    query.scope,
                    side.name(),
                    rows.len(),
                    elapsed
                );
                self.metrics
                    .observe_query_duration(side.name(), &query.table, query.query_type, elapsed);
            }
            Err(e) => {
                warn!(
                    "{} {} query failed on {}: {}",
                    query.table,
                    query.query_type,
                    side.name(),
                    e
                );
                if let Some(kind) = e.kind() {
                    self.metrics.inc_query_error(side.name(), &query.table, kind);
                }
            }
        }

        result
    }

    /// Run the matching statements on both sides concurrently.
    pub async fn run_both(
        &self,
        source: (&Side, &Query),
        target: (&Side, &Query),
    ) -> Result<(Vec<Row>, Vec<Row>)> {
        let (a, b) = tokio::join!(
            self.run(source.0, source.1),
            self.run(target.0, target.1)
        );
        Ok((a?, b?))
    }

    async fn execute(&self, side: &Side, query: &Query) -> Result<Vec<Row>> {
        let mut conn = side.provider.acquire().await?;
        self.metrics
            .set_connection_pool_usage(side.name(), side.provider.connections_in_use());

        let result = tokio::time::timeout(self.timeout, conn.execute(query)).await;
        if result.is_err() {
            conn.discard();
        }
        drop(conn);
        self.metrics
            .set_connection_pool_usage(side.name(), side.provider.connections_in_use());

        match result {
            Ok(result) => result,
            Err(_) => Err(DiffError::Timeout {
                database: side.name().to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
