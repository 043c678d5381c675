//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::TableSpec;
use crate::drivers::SslMode;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len().max(1),
        }
    }

    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Side A. Authoritative for row-count hints and chunk boundaries.
    pub source: DatabaseConfig,

    /// Side B.
    pub target: DatabaseConfig,

    /// Tables to compare.
    pub tables: Vec<TableSpec>,

    #[serde(default)]
    pub comparison: ComparisonConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.comparison = self.comparison.with_auto_tuning(&resources);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[serde(alias = "sqlserver", alias = "sql_server")]
    Mssql,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "mssql",
            DatabaseType::Postgres => "postgres",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Mssql => 1433,
            DatabaseType::Postgres => 5432,
        }
    }

    pub fn default_schema(&self) -> &'static str {
        match self {
            DatabaseType::Mssql => "dbo",
            DatabaseType::Postgres => "public",
        }
    }
}

/// Connection settings for one side of the comparison.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data source name used as the `database` metric label (default: the type).
    #[serde(default)]
    pub name: String,

    pub r#type: DatabaseType,

    pub host: String,

    /// Port (default: 1433 for mssql, 5432 for postgres).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    pub database: String,

    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Schema (default: "dbo" for mssql, "public" for postgres).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// MSSQL: encrypt the connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// MSSQL: trust the server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// PostgreSQL: TLS mode (default: disable).
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Maximum pooled connections (default: 5).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Seconds to wait for a free pooled connection (default: 30).
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,

    /// Seconds to wait for a new connection to be established (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Metric label for this data source.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.r#type.as_str()
        } else {
            &self.name
        }
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.r#type.default_port())
    }

    pub fn get_schema(&self) -> String {
        self.schema
            .clone()
            .unwrap_or_else(|| self.r#type.default_schema().to_string())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("ssl_mode", &self.ssl_mode)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// What to do after a chunk of a large table fails to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Stop at the first inconsistent or errored chunk.
    #[default]
    FailFast,
    /// Visit every chunk; only an errored chunk stops the scan.
    ScanAll,
}

/// Comparison engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Target rows per chunk for large tables (default: 100000).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Tables with more rows than this are compared chunk by chunk (default: 1000000).
    #[serde(default = "default_large_table_threshold")]
    pub large_table_threshold: i64,

    /// Concurrent table runs. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tables: Option<usize>,

    /// Use checksum comparison by default; full-row comparison otherwise (default: true).
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,

    /// Scopes expected to hold at most this many rows use full-row comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_row_max_rows: Option<i64>,

    #[serde(default)]
    pub chunk_policy: ChunkPolicy,

    /// Per-statement timeout in seconds (default: 300).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            large_table_threshold: default_large_table_threshold(),
            max_concurrent_tables: None,
            checksum_enabled: true,
            full_row_max_rows: None,
            chunk_policy: ChunkPolicy::default(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl ComparisonConfig {
    /// Fill unset values from system resources.
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        // Comparisons are I/O bound, so allow more runs than cores, capped at 32.
        if self.max_concurrent_tables.is_none() {
            let runs = (resources.cpu_cores * 2).clamp(2, 32);
            self.max_concurrent_tables = Some(runs);
        }

        info!(
            "Auto-tuned config: max_concurrent_tables={}, chunk_size={}, large_table_threshold={}",
            self.get_max_concurrent_tables(),
            self.chunk_size,
            self.large_table_threshold
        );

        self
    }

    pub fn get_max_concurrent_tables(&self) -> usize {
        self.max_concurrent_tables.unwrap_or(10)
    }
}

/// Background refresh settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub auto_refresh: AutoRefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between scheduled passes over all tables (default: 300).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for AutoRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
        }
    }
}

/// Metric labelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Value of the `environment` label (default: "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Extra labels appended to every metric.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            labels: BTreeMap::new(),
        }
    }
}

/// HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    5
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_chunk_size() -> u64 {
    100_000
}

fn default_large_table_threshold() -> i64 {
    1_000_000
}

fn default_query_timeout() -> u64 {
    300
}

fn default_interval() -> u64 {
    300
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}
