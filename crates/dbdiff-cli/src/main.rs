//! dbdiff CLI - continuous consistency checks between two databases.

mod http;

use clap::{Parser, Subcommand};
use dbdiff::{AppContext, Config, DiffError, Scheduler, TableComparisonRun};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbdiff")]
#[command(about = "Continuous consistency checks between tables in two databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve metrics and compare tables on a schedule
    Serve {
        /// Listen address, overriding server.listen from the config
        #[arg(long)]
        listen: Option<String>,
    },

    /// Compare tables once and exit
    Check {
        /// Compare only this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Test database connections
    HealthCheck,

    /// Validate the configuration file and exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, DiffError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::ValidateConfig => {
            println!(
                "Configuration is valid: {} table(s), {} ({}) -> {} ({})",
                config.tables.len(),
                config.source.label(),
                config.source.r#type.as_str(),
                config.target.label(),
                config.target.r#type.as_str()
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::HealthCheck => {
            let ctx = AppContext::connect(config)?;
            let result = ctx.test_connections().await;
            ctx.close().await;
            result?;
            println!("Health check passed: both databases reachable");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { table } => {
            let config = config.with_auto_tuning();
            let scheduler = Scheduler::new(Arc::new(AppContext::connect(config)?));
            let cancel = scheduler.cancellation_token();
            setup_signal_handler(cancel.clone(), cli.shutdown_timeout);

            let (runs, expected) = match table {
                Some(name) => {
                    let spec = scheduler
                        .context()
                        .config
                        .table(&name)
                        .cloned()
                        .ok_or_else(|| {
                            DiffError::Config(format!("table '{}' is not configured", name))
                        })?;
                    (vec![scheduler.run_one(&spec).await?], 1)
                }
                None => {
                    scheduler.run_all();
                    scheduler.wait_idle().await;
                    (
                        scheduler.latest_runs(),
                        scheduler.context().config.tables.len(),
                    )
                }
            };
            scheduler.context().close().await;

            print_runs(&runs, cli.output_json)?;

            let all_consistent = runs.len() == expected
                && runs
                    .iter()
                    .all(|r| r.outcome.as_ref().is_some_and(|o| o.is_consistent()));
            if cancel.is_cancelled() {
                warn!("Interrupted before every table was compared");
            }
            Ok(if all_consistent {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Commands::Serve { listen } => {
            let config = config.with_auto_tuning();
            let listen = listen.unwrap_or_else(|| config.server.listen.clone());
            let refresh = config.monitoring.auto_refresh.clone();

            let ctx = Arc::new(AppContext::connect(config)?);
            if let Err(e) = ctx.test_connections().await {
                warn!("Starting with an unreachable database: {}", e);
            }

            let scheduler = Scheduler::new(ctx.clone());
            let cancel = scheduler.cancellation_token();
            setup_signal_handler(cancel.clone(), cli.shutdown_timeout);

            if refresh.enabled {
                scheduler.start(Duration::from_secs(refresh.interval_secs));
            }

            let served = http::serve(scheduler.clone(), &listen, cancel.clone()).await;
            // A bind failure leaves the scheduler running; stop it either way.
            cancel.cancel();

            scheduler
                .shutdown(Duration::from_secs(cli.shutdown_timeout))
                .await;
            ctx.close().await;
            served?;
            info!("Shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_runs(runs: &[TableComparisonRun], output_json: bool) -> Result<(), DiffError> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(runs)?);
        return Ok(());
    }

    println!("Comparison results:");
    for run in runs {
        let outcome = run.outcome.as_ref().map(|o| o.label()).unwrap_or("cancelled");
        print!("  {}: {} ({:.2}s", run.table, outcome, run.duration_seconds());
        if let Some(counts) = &run.row_counts {
            print!(", rows {}/{}", counts.source, counts.target);
        }
        if !run.chunks.is_empty() {
            print!(", {} chunk(s)", run.chunks_compared());
        }
        println!(")");
        if let Some(dbdiff::ComparisonOutcome::Error { detail, .. }) = &run.outcome {
            println!("    Error: {}", detail);
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler(token: CancellationToken, shutdown_timeout: u64) {
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
        });
    }
}

#[cfg(not(unix))]
fn setup_signal_handler(token: CancellationToken, _shutdown_timeout: u64) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
    });
}
