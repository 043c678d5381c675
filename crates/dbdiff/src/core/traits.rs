//! Core traits for database-agnostic comparison.
//!
//! This module defines the seams between the comparison engine and the
//! database drivers:
//!
//! - [`ConnectionProvider`]: Hands out scoped connections for one data source
//! - [`Connection`]: Executes a single comparison [`Query`]
//! - [`Dialect`]: SQL syntax strategy for different database engines
//!
//! # Design Patterns
//!
//! - **Strategy**: Dialect provides interchangeable SQL rendering
//! - **RAII**: Connections are returned to their pool when dropped, so every
//!   exit path (including cancellation) releases them

use std::fmt;

use async_trait::async_trait;

use crate::drivers::DialectImpl;
use crate::error::Result;

use super::schema::{ColumnType, Scope};
use super::value::{Row, SqlValue};

/// Kind of statement issued by the engine, used as the `query_type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Count,
    Checksum,
    FetchRows,
    SampleKey,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Count => "count",
            QueryType::Checksum => "checksum",
            QueryType::FetchRows => "fetch_rows",
            QueryType::SampleKey => "sample_key",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a boundary sample relative to the scope's lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySample {
    /// Rows to skip past the lower bound.
    pub offset: u64,
    /// Exclude rows equal to the lower bound.
    pub exclusive: bool,
}

/// A comparison statement together with the intent it was built from.
///
/// Database drivers only execute `sql`. The structured fields keep metric
/// labels and in-memory providers independent of SQL text.
#[derive(Debug, Clone)]
pub struct Query {
    pub query_type: QueryType,
    pub table: String,
    pub scope: Scope,
    pub sample: Option<KeySample>,
    pub sql: String,
}

/// A checked-out connection. Dropping it returns it to the pool.
#[async_trait]
pub trait Connection: Send {
    /// Execute one statement and read its full result.
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>>;

    /// Round-trip a trivial statement.
    async fn ping(&mut self) -> Result<()>;

    /// Close this connection instead of returning it to the pool.
    ///
    /// Called after a statement was abandoned partway through its result.
    fn discard(&mut self) {}
}

/// Source of connections for one named data source.
///
/// Providers enforce their own pool limits and acquisition timeouts.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Data source name, used as the `database` metric label.
    fn name(&self) -> &str;

    /// SQL dialect spoken by this data source.
    fn dialect(&self) -> &DialectImpl;

    /// Check out a connection, waiting for a free pool slot if needed.
    async fn acquire(&self) -> Result<Box<dyn Connection>>;

    /// Connections currently checked out.
    fn connections_in_use(&self) -> usize;

    /// Verify the data source is reachable.
    async fn test_connection(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        conn.ping().await
    }

    /// Close the underlying pool.
    async fn close(&self) {}
}

/// SQL syntax strategy.
pub trait Dialect: Send + Sync {
    /// Dialect name.
    fn name(&self) -> &str;

    /// Quote an identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Schema-qualified table reference.
    fn qualify(&self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            self.quote_ident(table)
        } else {
            format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
        }
    }

    /// Render a value as an inline literal.
    fn literal(&self, value: &SqlValue) -> String;

    /// Expression rendering a column as normalized text: `'N'` for NULL,
    /// otherwise `'V'` followed by the value.
    fn normalize_expr(&self, column: &str, ty: ColumnType) -> String;

    /// Join normalized expressions with a `|` separator.
    fn concat(&self, exprs: &[String]) -> String;

    /// Unsigned 32-bit hash of a text expression (first 4 bytes of its MD5).
    fn row_hash_expr(&self, text_expr: &str) -> String;

    /// Row count aggregate.
    fn count_expr(&self) -> &'static str;

    /// Sum of an integer expression rendered as decimal text, `'0'` when empty.
    fn sum_as_text(&self, expr: &str) -> String;

    /// Batch column rendered as text for embedding back as a literal.
    fn key_text_expr(&self, column: &str) -> String;

    /// `ORDER BY` clause that skips `offset` rows and returns one.
    fn order_offset_one(&self, order_by: &str, offset: u64) -> String;
}
