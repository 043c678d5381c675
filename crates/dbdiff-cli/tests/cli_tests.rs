//! CLI integration tests for dbdiff.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for configuration errors. None of them needs a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the dbdiff binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("dbdiff").unwrap();
    cmd.env_remove("CONFIG_PATH").env_remove("RUST_LOG");
    cmd
}

const VALID_CONFIG: &str = r#"
source:
  name: mssql
  type: mssql
  host: 127.0.0.1
  port: 1
  database: app
  user: sa
  password: secret
target:
  name: postgresql
  type: postgres
  host: 127.0.0.1
  port: 2
  database: app
  user: checker
  password: secret
tables:
  - name: orders
    primary_key: id
    batch_columns: [id]
    comparison_columns: [status, total]
  - name: customers
    primary_key: id
    batch_columns: [id]
    comparison_columns: [email]
"#;

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", content).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("validate-config"));
}

#[test]
fn test_serve_subcommand_help() {
    cmd()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--listen"));
}

#[test]
fn test_check_subcommand_help() {
    cmd()
        .args(["check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbdiff"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_shutdown_timeout_default() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 60]"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("CONFIG_PATH"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args(["-c", "/nonexistent/dbdiff.yaml", "validate-config"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let file = config_file("source: [unclosed");
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "validate-config"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("YAML error"));
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let file = config_file("tables: []");
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "validate-config"])
        .assert()
        .code(2);
}

#[test]
fn test_config_without_tables_exits_with_code_2() {
    let content = VALID_CONFIG
        .split("tables:")
        .next()
        .unwrap()
        .to_string()
        + "tables: []";
    let file = config_file(&content);
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "validate-config"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("at least one table is required"));
}

#[test]
fn test_unknown_table_exits_with_code_2() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "check", "--table", "invoices"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("table 'invoices' is not configured"));
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_validate_config_succeeds() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["-c", file.path().to_str().unwrap(), "validate-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid: 2 table(s)"))
        .stdout(predicate::str::contains("mssql (mssql) -> postgresql (postgres)"));
}

#[test]
fn test_config_path_from_environment() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .env("CONFIG_PATH", file.path())
        .arg("validate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test database connections"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
