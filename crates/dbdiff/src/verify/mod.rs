//! Consistency verification between two data sources.
//!
//! A table run moves through a fixed sequence of checks, cheapest first:
//!
//! - **Row count**: `COUNT(*)` on both sides; a mismatch ends the run
//! - **Whole table**: tables at or below the large-table threshold are
//!   compared in one scope with the configured equality strategy
//! - **Chunked**: larger tables are split into key ranges of roughly
//!   `chunk_size` rows, sampled from the source side, and compared range
//!   by range in ascending key order
//!
//! Every statement is acquired, executed and released on its own, so no
//! connection is held while the engine decides what to do next.

pub mod engine;
pub mod planner;
pub mod query;
pub mod runner;
pub mod strategy;

pub use engine::ConsistencyEngine;
pub use planner::{ChunkPlan, ChunkPlanner};
pub use query::QueryBuilder;
pub use runner::{QueryRunner, Side};
pub use strategy::{
    strategy_for, ChecksumCompare, EqualityStrategy, FullRowCompare, RowCountCheck,
    StrategyContext,
};
