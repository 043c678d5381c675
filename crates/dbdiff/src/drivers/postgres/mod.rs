//! PostgreSQL connection provider.
//!
//! Pooled with `deadpool-postgres`. Statements run through the simple query
//! protocol, so every value arrives as text and no statement is prepared.

mod dialect;

pub use dialect::PostgresDialect;

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::core::traits::{Connection, ConnectionProvider, Query};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::make_tls_connect;
use crate::drivers::DialectImpl;
use crate::error::{DiffError, Result};

/// PostgreSQL data source backed by a deadpool pool.
pub struct PgProvider {
    name: String,
    pool: Pool,
    dialect: DialectImpl,
}

impl PgProvider {
    /// Build the pool. Connections are opened lazily on first use.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let name = config.label().to_string();

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.get_port())
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .application_name("dbdiff")
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = match make_tls_connect(config.ssl_mode)? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("{}: PostgreSQL TLS is disabled", name);
                Manager::from_config(pg_config, NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .wait_timeout(Some(Duration::from_secs(config.pool_timeout_secs)))
            .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DiffError::connection(&name, format!("creating pool: {}", e)))?;

        info!(
            "PostgreSQL pool for {}: {}:{}/{} (max {} connections)",
            name,
            config.host,
            config.get_port(),
            config.database,
            config.pool_size
        );

        Ok(Self {
            name,
            pool,
            dialect: DialectImpl::Postgres(PostgresDialect::new()),
        })
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DiffError::connection(&self.name, e))?;
        Ok(Box::new(PgConnection {
            client,
            database: self.name.clone(),
        }))
    }

    fn connections_in_use(&self) -> usize {
        let status = self.pool.status();
        status.size.saturating_sub(status.available)
    }

    async fn close(&self) {
        self.pool.close();
    }
}

struct PgConnection {
    client: Object,
    database: String,
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>> {
        let messages = self
            .client
            .simple_query(&query.sql)
            .await
            .map_err(|e| DiffError::query(&self.database, e))?;

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| match row.get(i) {
                            Some(text) => SqlValue::Text(text.to_string()),
                            None => SqlValue::Null,
                        })
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn ping(&mut self) -> Result<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DiffError::query(&self.database, e))?;
        Ok(())
    }
}
