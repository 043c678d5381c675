//! Database driver implementations.
//!
//! - [`mssql`]: SQL Server provider (tiberius + bb8)
//! - [`postgres`]: PostgreSQL provider (tokio-postgres + deadpool)
//! - [`common`]: Shared utilities (TLS)
//!
//! Each driver supplies a [`ConnectionProvider`] and a [`Dialect`]. Dialects
//! are dispatched through the [`DialectImpl`] enum rather than trait objects.

pub mod common;
pub mod mssql;
pub mod postgres;

pub use common::SslMode;
pub use mssql::{MssqlDialect, MssqlProvider};
pub use postgres::{PgProvider, PostgresDialect};

use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseType};
use crate::core::schema::ColumnType;
use crate::core::traits::{ConnectionProvider, Dialect};
use crate::core::value::SqlValue;

/// Enum-based static dispatch for dialects.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Mssql(MssqlDialect),
    Postgres(PostgresDialect),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            DialectImpl::Mssql($d) => $body,
            DialectImpl::Postgres($d) => $body,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn quote_ident(&self, name: &str) -> String {
        dispatch!(self, d => d.quote_ident(name))
    }

    fn literal(&self, value: &SqlValue) -> String {
        dispatch!(self, d => d.literal(value))
    }

    fn normalize_expr(&self, column: &str, ty: ColumnType) -> String {
        dispatch!(self, d => d.normalize_expr(column, ty))
    }

    fn concat(&self, exprs: &[String]) -> String {
        dispatch!(self, d => d.concat(exprs))
    }

    fn row_hash_expr(&self, text_expr: &str) -> String {
        dispatch!(self, d => d.row_hash_expr(text_expr))
    }

    fn count_expr(&self) -> &'static str {
        dispatch!(self, d => d.count_expr())
    }

    fn sum_as_text(&self, expr: &str) -> String {
        dispatch!(self, d => d.sum_as_text(expr))
    }

    fn key_text_expr(&self, column: &str) -> String {
        dispatch!(self, d => d.key_text_expr(column))
    }

    fn order_offset_one(&self, order_by: &str, offset: u64) -> String {
        dispatch!(self, d => d.order_offset_one(order_by, offset))
    }
}

impl DialectImpl {
    pub fn for_type(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::Mssql => DialectImpl::Mssql(MssqlDialect::new()),
            DatabaseType::Postgres => DialectImpl::Postgres(PostgresDialect::new()),
        }
    }
}

/// Build the provider for one side of the comparison.
pub fn connect(config: &DatabaseConfig) -> crate::error::Result<Arc<dyn ConnectionProvider>> {
    Ok(match config.r#type {
        DatabaseType::Mssql => Arc::new(MssqlProvider::connect(config)?),
        DatabaseType::Postgres => Arc::new(PgProvider::connect(config)?),
    })
}
