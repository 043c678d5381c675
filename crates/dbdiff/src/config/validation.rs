//! Configuration validation.

use std::collections::HashSet;

use super::{Config, DatabaseConfig};
use crate::error::{DiffError, Result};

/// Labels owned by the fixed metric families.
const RESERVED_LABELS: &[&str] = &[
    "database",
    "table",
    "environment",
    "query_type",
    "error_type",
    "chunk_id",
    "le",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("target", &config.target)?;

    if config.source.host == config.target.host
        && config.source.get_port() == config.target.get_port()
        && config.source.database == config.target.database
    {
        return Err(DiffError::Config(
            "source and target cannot be the same database".into(),
        ));
    }
    if config.source.label() == config.target.label() {
        return Err(DiffError::Config(format!(
            "source and target need distinct names, both are '{}'",
            config.source.label()
        )));
    }

    if config.tables.is_empty() {
        return Err(DiffError::Config("at least one table is required".into()));
    }
    let mut seen = HashSet::new();
    for table in &config.tables {
        if table.name.is_empty() {
            return Err(DiffError::Config("tables[].name is required".into()));
        }
        if !seen.insert(table.name.as_str()) {
            return Err(DiffError::Config(format!(
                "table '{}' is listed more than once",
                table.name
            )));
        }
        if table.primary_key.is_empty() {
            return Err(DiffError::Config(format!(
                "table '{}': primary_key is required",
                table.name
            )));
        }
        if table.batch_columns.is_empty() {
            return Err(DiffError::Config(format!(
                "table '{}': batch_columns is required",
                table.name
            )));
        }
        if table.comparison_columns.is_empty() {
            return Err(DiffError::Config(format!(
                "table '{}': comparison_columns is required",
                table.name
            )));
        }
    }

    let comparison = &config.comparison;
    if comparison.chunk_size == 0 {
        return Err(DiffError::Config(
            "comparison.chunk_size must be at least 1".into(),
        ));
    }
    if comparison.large_table_threshold < 0 {
        return Err(DiffError::Config(
            "comparison.large_table_threshold cannot be negative".into(),
        ));
    }
    if let Some(0) = comparison.max_concurrent_tables {
        return Err(DiffError::Config(
            "comparison.max_concurrent_tables must be at least 1".into(),
        ));
    }
    if comparison.query_timeout_secs == 0 {
        return Err(DiffError::Config(
            "comparison.query_timeout_secs must be at least 1".into(),
        ));
    }

    let refresh = &config.monitoring.auto_refresh;
    if refresh.enabled && refresh.interval_secs == 0 {
        return Err(DiffError::Config(
            "monitoring.auto_refresh.interval_secs must be at least 1".into(),
        ));
    }

    if config.metrics.environment.is_empty() {
        return Err(DiffError::Config("metrics.environment cannot be empty".into()));
    }
    for name in config.metrics.labels.keys() {
        if RESERVED_LABELS.contains(&name.as_str()) {
            return Err(DiffError::Config(format!(
                "metrics.labels: '{}' is a reserved label name",
                name
            )));
        }
        if !is_valid_label_name(name) {
            return Err(DiffError::Config(format!(
                "metrics.labels: '{}' is not a valid label name",
                name
            )));
        }
    }

    Ok(())
}

fn validate_database(side: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(DiffError::Config(format!("{}.host is required", side)));
    }
    if db.database.is_empty() {
        return Err(DiffError::Config(format!("{}.database is required", side)));
    }
    if db.user.is_empty() {
        return Err(DiffError::Config(format!("{}.user is required", side)));
    }
    if db.pool_size == 0 {
        return Err(DiffError::Config(format!(
            "{}.pool_size must be at least 1",
            side
        )));
    }
    Ok(())
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`.
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
