//! # dbdiff
//!
//! Continuous consistency checks between tables held in two databases.
//!
//! This library decides whether two independently queried copies of a table
//! are identical without transferring the table, and reports the result as
//! Prometheus metrics:
//!
//! - **Row-count fast path**: a count mismatch is conclusive
//! - **Checksum and full-row strategies** computed with each engine's native SQL
//! - **Chunked comparison** of large tables over sampled key ranges
//! - **Bounded concurrency** across tables with graceful cancellation
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbdiff::{AppContext, Config, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> dbdiff::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let scheduler = Scheduler::new(Arc::new(AppContext::connect(config)?));
//!     let table = scheduler.context().config.tables[0].clone();
//!     let run = scheduler.run_one(&table).await?;
//!     println!("{}: {:?}", run.table, run.outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ChunkPolicy, ComparisonConfig, Config, DatabaseConfig, DatabaseType};
pub use core::{
    ChunkBoundary, ComparisonOutcome, RunPhase, StrategyKind, TableComparisonRun, TableSpec,
};
pub use error::{DiffError, ErrorKind, Result};
pub use metrics::{ComparisonMetrics, MetricsSink, Registry};
pub use scheduler::{AppContext, Scheduler, TriggerReport};
pub use verify::ConsistencyEngine;
