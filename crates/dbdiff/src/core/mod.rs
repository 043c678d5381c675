//! Core abstractions for database-agnostic comparison.
//!
//! - [`schema`]: Table descriptors, key tuples, chunk boundaries and scopes
//! - [`value`]: Decoded result values
//! - [`traits`]: Connection providers and SQL dialects
//! - [`outcome`]: Comparison outcomes and run records

pub mod outcome;
pub mod schema;
pub mod traits;
pub mod value;

pub use outcome::{ChunkOutcome, ComparisonOutcome, RowCounts, RunPhase, TableComparisonRun};
pub use schema::{Bound, ChunkBoundary, ColumnType, KeyTuple, Scope, StrategyKind, TableSpec};
pub use traits::{Connection, ConnectionProvider, Dialect, KeySample, Query, QueryType};
pub use value::{Row, SqlValue};
