//! Per-table comparison state machine.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChunkPolicy, ComparisonConfig};
use crate::core::outcome::{ChunkOutcome, ComparisonOutcome, RunPhase, TableComparisonRun};
use crate::core::schema::{Scope, StrategyKind, TableSpec};
use crate::error::Result;
use crate::metrics::ComparisonMetrics;

use super::planner::ChunkPlanner;
use super::runner::{QueryRunner, Side};
use super::strategy::{strategy_for, RowCountCheck, StrategyContext};

/// Compares one table at a time between a source and a target side.
///
/// The source side is authoritative for chunk planning.
#[derive(Clone)]
pub struct ConsistencyEngine {
    source: Side,
    target: Side,
    runner: QueryRunner,
    metrics: ComparisonMetrics,
    settings: ComparisonConfig,
}

impl ConsistencyEngine {
    pub fn new(
        source: Side,
        target: Side,
        metrics: ComparisonMetrics,
        settings: ComparisonConfig,
    ) -> Self {
        let runner = QueryRunner::new(
            metrics.clone(),
            Duration::from_secs(settings.query_timeout_secs),
        );
        Self {
            source,
            target,
            runner,
            metrics,
            settings,
        }
    }

    pub fn source(&self) -> &Side {
        &self.source
    }

    pub fn target(&self) -> &Side {
        &self.target
    }

    /// Strategy for a scope expected to hold `expected_rows` rows.
    pub fn select_strategy(&self, table: &TableSpec, expected_rows: i64) -> StrategyKind {
        if let Some(kind) = table.strategy {
            return kind;
        }
        if let Some(max) = self.settings.full_row_max_rows {
            if expected_rows <= max {
                return StrategyKind::FullRow;
            }
        }
        if self.settings.checksum_enabled {
            StrategyKind::Checksum
        } else {
            StrategyKind::FullRow
        }
    }

    /// Publish current pool usage for both sides.
    pub fn refresh_pool_usage(&self) {
        for side in [&self.source, &self.target] {
            self.metrics
                .set_connection_pool_usage(side.name(), side.provider.connections_in_use());
        }
    }

    /// Run a full comparison of `table`.
    ///
    /// Never fails: collaborator errors become an `Error` outcome and a
    /// cancelled run comes back with no outcome.
    pub async fn compare_table(
        &self,
        table: &TableSpec,
        cancel: &CancellationToken,
    ) -> TableComparisonRun {
        let mut run = TableComparisonRun::start(&table.name);
        info!("Starting comparison for table: {}", table.name);

        match self.execute(table, &mut run, cancel).await {
            Ok(Some(outcome)) => run.finish(outcome),
            Ok(None) => run.cancel(),
            Err(e) => run.finish(ComparisonOutcome::from_error(&e)),
        }

        self.record(&run);
        run
    }

    async fn execute(
        &self,
        table: &TableSpec,
        run: &mut TableComparisonRun,
        cancel: &CancellationToken,
    ) -> Result<Option<ComparisonOutcome>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let ctx = StrategyContext {
            table,
            source: &self.source,
            target: &self.target,
            runner: &self.runner,
        };

        run.transition(RunPhase::Counting);
        let counts = RowCountCheck.counts(&ctx, &Scope::Table).await?;
        run.row_counts = Some(counts);
        self.metrics
            .set_row_count(self.source.name(), &table.name, counts.source);
        self.metrics
            .set_row_count(self.target.name(), &table.name, counts.target);
        self.metrics
            .set_row_difference(&table.name, counts.difference());

        info!(
            "Table {} - {}: {} rows, {}: {} rows",
            table.name,
            self.source.name(),
            counts.source,
            self.target.name(),
            counts.target
        );

        if counts.source != counts.target {
            return Ok(Some(ComparisonOutcome::Inconsistent));
        }

        if counts.source <= self.settings.large_table_threshold {
            run.transition(RunPhase::Comparing);
            let kind = self.select_strategy(table, counts.source);
            run.strategy = Some(kind);
            let outcome = strategy_for(kind).compare(&ctx, &Scope::Table).await?;
            return Ok(Some(outcome));
        }

        run.transition(RunPhase::Planning);
        let mut plan = ChunkPlanner::new(self.settings.chunk_size).plan(
            table,
            counts.source,
            &self.source,
            &self.runner,
        )?;
        let kind = self.select_strategy(table, self.settings.chunk_size as i64);
        run.strategy = Some(kind);
        let strategy = strategy_for(kind);
        debug!(
            "{}: ~{} chunks of {} rows using {}",
            table.name,
            plan.expected_chunks(),
            self.settings.chunk_size,
            strategy.name()
        );

        run.transition(RunPhase::ChunkLoop);
        let mut mismatched = 0usize;
        loop {
            if cancel.is_cancelled() {
                info!(
                    "{}: cancelled after {} chunks",
                    table.name,
                    run.chunks_compared()
                );
                return Ok(None);
            }

            let chunk = match plan.next_chunk().await? {
                Some(chunk) => chunk,
                None => break,
            };
            let scope = Scope::Chunk(chunk.clone());

            let outcome = match strategy.compare(&ctx, &scope).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = ComparisonOutcome::from_error(&e);
                    self.metrics
                        .set_checksum_status(&table.name, chunk.id, &outcome);
                    run.chunks.push(ChunkOutcome::new(&chunk, outcome));
                    return Err(e);
                }
            };

            debug!("{}: {} is {}", table.name, scope, outcome.label());
            self.metrics
                .set_checksum_status(&table.name, chunk.id, &outcome);
            run.chunks.push(ChunkOutcome::new(&chunk, outcome.clone()));

            if !outcome.is_consistent() {
                warn!("{}: mismatch in {}", table.name, scope);
                match self.settings.chunk_policy {
                    ChunkPolicy::FailFast => return Ok(Some(outcome)),
                    ChunkPolicy::ScanAll => mismatched += 1,
                }
            }
        }

        if mismatched > 0 {
            info!(
                "{}: {}/{} chunks mismatched",
                table.name,
                mismatched,
                run.chunks_compared()
            );
        }
        Ok(Some(ComparisonOutcome::from_equal(mismatched == 0)))
    }

    fn record(&self, run: &TableComparisonRun) {
        let outcome = match &run.outcome {
            Some(outcome) => outcome,
            None => {
                info!("Comparison of {} cancelled", run.table);
                return;
            }
        };

        let seconds = run.duration_seconds();
        self.metrics
            .observe_comparison_duration(&run.table, seconds);
        self.metrics.set_comparison_status(&run.table, outcome);

        match outcome {
            ComparisonOutcome::Consistent => {
                let finished = run
                    .finished_at
                    .map(|t| t.timestamp_millis() as f64 / 1000.0)
                    .unwrap_or_default();
                self.metrics
                    .set_last_successful_comparison(&run.table, finished);
                info!("Table {} is consistent ({:.1}s)", run.table, seconds);
            }
            ComparisonOutcome::Inconsistent => {
                warn!("Table {} is INCONSISTENT ({:.1}s)", run.table, seconds);
            }
            ComparisonOutcome::Error { kind, detail } => {
                self.metrics.inc_comparison_error(&run.table, *kind);
                error!("Comparison of {} failed ({}): {}", run.table, kind, detail);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::MetricsConfig;
    use crate::core::traits::QueryType;
    use crate::error::ErrorKind;
    use crate::metrics::*;
    use crate::testing::{MemoryProvider, MemoryTable};

    struct Harness {
        source: Arc<MemoryProvider>,
        target: Arc<MemoryProvider>,
        registry: Arc<Registry>,
        engine: ConsistencyEngine,
    }

    fn settings() -> ComparisonConfig {
        ComparisonConfig {
            chunk_size: 1_000,
            large_table_threshold: 1_000,
            ..ComparisonConfig::default()
        }
    }

    fn harness(source: MemoryProvider, target: MemoryProvider, settings: ComparisonConfig) -> Harness {
        let source = Arc::new(source);
        let target = Arc::new(target);
        let registry = Arc::new(Registry::new());
        ComparisonMetrics::describe(&registry);
        let metrics = ComparisonMetrics::new(registry.clone(), &MetricsConfig::default());
        let engine = ConsistencyEngine::new(
            Side::new(source.clone(), "dbo"),
            Side::new(target.clone(), "public"),
            metrics,
            settings,
        );
        Harness {
            source,
            target,
            registry,
            engine,
        }
    }

    fn table(name: &str) -> TableSpec {
        TableSpec::new(name, &["id"], &["id"], &["status"])
    }

    fn status(registry: &Registry, table: &str) -> Option<f64> {
        registry
            .snapshot()
            .value(COMPARISON_STATUS, &[("table", table)])
    }

    #[tokio::test]
    async fn test_row_count_mismatch_short_circuits() {
        let h = harness(
            MemoryProvider::new("mssql").with_row_count("orders", 1_000_000),
            MemoryProvider::new("postgresql").with_row_count("orders", 999_998),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("orders"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Inconsistent));
        assert_eq!(
            run.phases,
            vec![RunPhase::Pending, RunPhase::Counting, RunPhase::Done]
        );
        let snapshot = h.registry.snapshot();
        assert_eq!(
            snapshot.value(ROW_DIFFERENCE, &[("table", "orders")]),
            Some(2.0)
        );
        assert_eq!(status(&h.registry, "orders"), Some(0.0));
        assert_eq!(
            snapshot.histogram_count(QUERY_DURATION, &[("query_type", "checksum")]),
            0
        );
        assert_eq!(
            snapshot.histogram_count(QUERY_DURATION, &[("query_type", "fetch_rows")]),
            0
        );
        assert_eq!(
            snapshot.histogram_count(QUERY_DURATION, &[("query_type", "count")]),
            2
        );
    }

    #[tokio::test]
    async fn test_small_table_checksum_consistent() {
        let h = harness(
            MemoryProvider::new("mssql").with_table("users", MemoryTable::sequential(500)),
            MemoryProvider::new("postgresql").with_table("users", MemoryTable::sequential(500)),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("users"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Consistent));
        assert_eq!(run.strategy, Some(StrategyKind::Checksum));
        assert_eq!(run.phase, RunPhase::Done);
        assert!(run.phases.contains(&RunPhase::Comparing));
        assert_eq!(status(&h.registry, "users"), Some(1.0));

        let finished = run.finished_at.unwrap().timestamp_millis() as f64 / 1000.0;
        assert_eq!(
            h.registry
                .snapshot()
                .value(LAST_SUCCESSFUL_COMPARISON, &[("table", "users")]),
            Some(finished)
        );
        assert_eq!(
            h.registry
                .snapshot()
                .histogram_count(COMPARISON_DURATION, &[("table", "users")]),
            1
        );
    }

    #[tokio::test]
    async fn test_small_table_checksum_mismatch() {
        let mut target = MemoryTable::sequential(500);
        target.set_values("250", &["refunded"]);
        let h = harness(
            MemoryProvider::new("mssql").with_table("users", MemoryTable::sequential(500)),
            MemoryProvider::new("postgresql").with_table("users", target),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("users"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Inconsistent));
        assert_eq!(status(&h.registry, "users"), Some(0.0));
        assert_eq!(
            h.registry
                .snapshot()
                .value(LAST_SUCCESSFUL_COMPARISON, &[("table", "users")]),
            None
        );
    }

    #[tokio::test]
    async fn test_large_table_all_chunks_consistent() {
        let h = harness(
            MemoryProvider::new("mssql").with_table("events", MemoryTable::sequential(5_000)),
            MemoryProvider::new("postgresql").with_table("events", MemoryTable::sequential(5_000)),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("events"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Consistent));
        assert_eq!(run.chunks_compared(), 5);
        assert_eq!(
            run.phases,
            vec![
                RunPhase::Pending,
                RunPhase::Counting,
                RunPhase::Planning,
                RunPhase::ChunkLoop,
                RunPhase::Done
            ]
        );
        let snapshot = h.registry.snapshot();
        assert_eq!(
            snapshot.series_count(CHECKSUM_STATUS, &[("table", "events")]),
            5
        );
        assert_eq!(
            snapshot.value(CHECKSUM_STATUS, &[("table", "events"), ("chunk_id", "4")]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_mismatched_chunk() {
        let mut target = MemoryTable::sequential(5_000);
        target.set_values("2500", &["shipped"]);
        let h = harness(
            MemoryProvider::new("mssql").with_table("events", MemoryTable::sequential(5_000)),
            MemoryProvider::new("postgresql").with_table("events", target),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("events"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Inconsistent));
        assert_eq!(run.chunks_compared(), 3);
        assert_eq!(run.chunks[2].outcome, ComparisonOutcome::Inconsistent);
        assert_eq!(h.source.queries_of(QueryType::Checksum), 3);
        assert_eq!(h.target.queries_of(QueryType::Checksum), 3);
        // Boundaries for chunks 0..=2 only; chunks 3 and 4 are never planned.
        assert_eq!(h.source.queries_of(QueryType::SampleKey), 3);
        assert_eq!(h.target.queries_of(QueryType::SampleKey), 0);
        assert_eq!(
            h.registry
                .snapshot()
                .value(CHECKSUM_STATUS, &[("table", "events"), ("chunk_id", "2")]),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_scan_all_visits_every_chunk() {
        let mut target = MemoryTable::sequential(5_000);
        target.set_values("1500", &["shipped"]);
        target.set_values("4500", &["shipped"]);
        let h = harness(
            MemoryProvider::new("mssql").with_table("events", MemoryTable::sequential(5_000)),
            MemoryProvider::new("postgresql").with_table("events", target),
            ComparisonConfig {
                chunk_policy: ChunkPolicy::ScanAll,
                ..settings()
            },
        );
        let run = h
            .engine
            .compare_table(&table("events"), &CancellationToken::new())
            .await;

        assert_eq!(run.outcome, Some(ComparisonOutcome::Inconsistent));
        assert_eq!(run.chunks_compared(), 5);
        let mismatched: Vec<u64> = run
            .chunks
            .iter()
            .filter(|c| !c.outcome.is_consistent())
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(mismatched, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_connection_error() {
        let target = MemoryProvider::new("postgresql").with_table("orders", MemoryTable::sequential(10));
        target.set_exhausted(true);
        let h = harness(
            MemoryProvider::new("mssql").with_table("orders", MemoryTable::sequential(10)),
            target,
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("orders"), &CancellationToken::new())
            .await;

        assert_eq!(run.phase, RunPhase::Error);
        assert!(matches!(
            run.outcome,
            Some(ComparisonOutcome::Error {
                kind: ErrorKind::ConnectionError,
                ..
            })
        ));
        let snapshot = h.registry.snapshot();
        assert_eq!(status(&h.registry, "orders"), Some(-1.0));
        assert_eq!(
            snapshot.value(
                QUERY_ERRORS,
                &[("database", "postgresql"), ("table", "orders")]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                COMPARISON_ERRORS,
                &[("table", "orders"), ("error_type", "ConnectionError")]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.series_count(QUERY_ERRORS, &[("database", "mssql")]),
            0
        );
    }

    #[tokio::test]
    async fn test_chunk_failure_ends_run_with_error() {
        let target = MemoryProvider::new("postgresql").with_table("events", MemoryTable::sequential(5_000));
        target.fail_on(QueryType::Checksum);
        let h = harness(
            MemoryProvider::new("mssql").with_table("events", MemoryTable::sequential(5_000)),
            target,
            ComparisonConfig {
                chunk_policy: ChunkPolicy::ScanAll,
                ..settings()
            },
        );
        let run = h
            .engine
            .compare_table(&table("events"), &CancellationToken::new())
            .await;

        assert_eq!(run.chunks_compared(), 1);
        assert!(matches!(
            run.outcome,
            Some(ComparisonOutcome::Error {
                kind: ErrorKind::QueryError,
                ..
            })
        ));
        assert_eq!(
            h.registry
                .snapshot()
                .value(CHECKSUM_STATUS, &[("table", "events"), ("chunk_id", "0")]),
            Some(-1.0)
        );
    }

    #[tokio::test]
    async fn test_planning_failure_is_chunk_planning_error() {
        let source = MemoryProvider::new("mssql").with_table("events", MemoryTable::sequential(5_000));
        source.fail_on(QueryType::SampleKey);
        let h = harness(
            source,
            MemoryProvider::new("postgresql").with_table("events", MemoryTable::sequential(5_000)),
            settings(),
        );
        let run = h
            .engine
            .compare_table(&table("events"), &CancellationToken::new())
            .await;

        assert!(matches!(
            run.outcome,
            Some(ComparisonOutcome::Error {
                kind: ErrorKind::ChunkPlanningError,
                ..
            })
        ));
        assert_eq!(
            h.registry.snapshot().value(
                COMPARISON_ERRORS,
                &[("table", "events"), ("error_type", "ChunkPlanningError")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_nothing() {
        let h = harness(
            MemoryProvider::new("mssql").with_table("users", MemoryTable::sequential(5)),
            MemoryProvider::new("postgresql").with_table("users", MemoryTable::sequential(5)),
            settings(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = h.engine.compare_table(&table("users"), &cancel).await;

        assert_eq!(run.phase, RunPhase::Cancelled);
        assert!(run.outcome.is_none());
        assert_eq!(status(&h.registry, "users"), None);
        assert!(h.source.queries().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_runs_are_idempotent() {
        let h = harness(
            MemoryProvider::new("mssql").with_table("users", MemoryTable::sequential(300)),
            MemoryProvider::new("postgresql").with_table("users", MemoryTable::sequential(300)),
            settings(),
        );
        let cancel = CancellationToken::new();
        let first = h.engine.compare_table(&table("users"), &cancel).await;
        let second = h.engine.compare_table(&table("users"), &cancel).await;

        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.row_counts, second.row_counts);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_strategy_selection() {
        let h = harness(
            MemoryProvider::new("mssql"),
            MemoryProvider::new("postgresql"),
            ComparisonConfig {
                full_row_max_rows: Some(100),
                ..settings()
            },
        );
        let plain = table("users");
        assert_eq!(h.engine.select_strategy(&plain, 50), StrategyKind::FullRow);
        assert_eq!(h.engine.select_strategy(&plain, 500), StrategyKind::Checksum);
        let pinned = table("users").with_strategy(StrategyKind::Checksum);
        assert_eq!(h.engine.select_strategy(&pinned, 50), StrategyKind::Checksum);

        let h = harness(
            MemoryProvider::new("mssql"),
            MemoryProvider::new("postgresql"),
            ComparisonConfig {
                checksum_enabled: false,
                ..settings()
            },
        );
        assert_eq!(h.engine.select_strategy(&plain, 500), StrategyKind::FullRow);
    }

    #[tokio::test]
    async fn test_full_row_small_table() {
        let mut target = MemoryTable::sequential(20);
        target.set_values("5", &["pending"]);
        let h = harness(
            MemoryProvider::new("mssql").with_table("users", MemoryTable::sequential(20)),
            MemoryProvider::new("postgresql").with_table("users", target),
            ComparisonConfig {
                checksum_enabled: false,
                ..settings()
            },
        );
        let run = h
            .engine
            .compare_table(&table("users"), &CancellationToken::new())
            .await;
        assert_eq!(run.strategy, Some(StrategyKind::FullRow));
        assert_eq!(run.outcome, Some(ComparisonOutcome::Inconsistent));
        assert_eq!(h.source.queries_of(QueryType::Checksum), 0);
    }
}
