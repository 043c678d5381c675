//! Microsoft SQL Server connection provider.
//!
//! Pooled with `bb8` over `tiberius` clients on tokio TCP streams.

mod dialect;

pub use dialect::MssqlDialect;

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::core::traits::{Connection, ConnectionProvider, Query};
use crate::core::value::{Row, SqlValue};
use crate::drivers::DialectImpl;
use crate::error::{DiffError, Result};

/// A tiberius client plus a flag bb8 checks before reusing it.
///
/// `broken` is set while a statement is in flight, so a client whose
/// response stream was abandoned is never handed out again.
struct TdsClient {
    client: Client<Compat<TcpStream>>,
    broken: bool,
}

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusManager {
    config: Config,
    connect_timeout: Duration,
}

impl TiberiusManager {
    fn new(db: &DatabaseConfig) -> Self {
        let mut config = Config::new();
        config.host(&db.host);
        config.port(db.get_port());
        config.database(&db.database);
        config.application_name("dbdiff");
        config.authentication(AuthMethod::sql_server(&db.user, &db.password));

        if db.encrypt {
            if db.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        Self {
            config,
            connect_timeout: Duration::from_secs(db.connect_timeout_secs),
        }
    }

    async fn open(&self) -> std::result::Result<Client<Compat<TcpStream>>, tiberius::error::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        match tokio::time::timeout(self.connect_timeout, self.open()).await {
            Ok(result) => result.map(|client| TdsClient {
                client,
                broken: false,
            }),
            Err(_) => Err(tiberius::error::Error::Io {
                kind: std::io::ErrorKind::TimedOut,
                message: format!(
                    "connect timed out after {}s",
                    self.connect_timeout.as_secs()
                ),
            }),
        }
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// SQL Server data source backed by a bb8 pool.
pub struct MssqlProvider {
    name: String,
    pool: Pool<TiberiusManager>,
    dialect: DialectImpl,
}

impl MssqlProvider {
    /// Build the pool. Connections are opened lazily on first use.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let name = config.label().to_string();
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(None)
            .connection_timeout(Duration::from_secs(config.pool_timeout_secs))
            .build_unchecked(TiberiusManager::new(config));

        info!(
            "MSSQL pool for {}: {}:{}/{} (max {} connections)",
            name,
            config.host,
            config.get_port(),
            config.database,
            config.pool_size
        );

        Ok(Self {
            name,
            pool,
            dialect: DialectImpl::Mssql(MssqlDialect::new()),
        })
    }
}

#[async_trait]
impl ConnectionProvider for MssqlProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.get_owned().await.map_err(|e| match e {
            RunError::User(err) => DiffError::connection(&self.name, err),
            RunError::TimedOut => {
                DiffError::connection(&self.name, "timed out waiting for a pooled connection")
            }
        })?;
        Ok(Box::new(MssqlConnection {
            conn,
            database: self.name.clone(),
        }))
    }

    fn connections_in_use(&self) -> usize {
        let state = self.pool.state();
        state.connections.saturating_sub(state.idle_connections) as usize
    }
}

struct MssqlConnection {
    conn: PooledConnection<'static, TiberiusManager>,
    database: String,
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn execute(&mut self, query: &Query) -> Result<Vec<Row>> {
        self.conn.broken = true;
        let rows = self
            .conn
            .client
            .simple_query(query.sql.as_str())
            .await
            .map_err(|e| DiffError::query(&self.database, e))?
            .into_first_result()
            .await
            .map_err(|e| DiffError::query(&self.database, e))?;
        self.conn.broken = false;

        rows.iter()
            .map(|row| {
                row.cells()
                    .map(|(column, data)| {
                        decode(data).ok_or_else(|| {
                            DiffError::query(
                                &self.database,
                                format!(
                                    "unsupported result type {:?} in column {}",
                                    column.column_type(),
                                    column.name()
                                ),
                            )
                        })
                    })
                    .collect::<Result<Row>>()
            })
            .collect()
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.broken = true;
        self.conn
            .client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DiffError::query(&self.database, e))?
            .into_row()
            .await
            .map_err(|e| DiffError::query(&self.database, e))?;
        self.conn.broken = false;
        Ok(())
    }

    fn discard(&mut self) {
        self.conn.broken = true;
    }
}

/// Comparison queries only return integers, bits and text.
fn decode(data: &ColumnData<'static>) -> Option<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        _ => return None,
    };
    Some(value.unwrap_or(SqlValue::Null))
}
