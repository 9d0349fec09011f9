//! mysql-pg-sync CLI - incremental MySQL to PostgreSQL row sync.

use clap::{Parser, Subcommand};
use mysql_pg_sync::{
    Config, MigrateError, MigrationResult, Orchestrator, SequenceOutcome, TableRegistry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-pg-sync")]
#[command(about = "Incremental MySQL to PostgreSQL row sync")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file. Without it, connection URLs are read
    /// from MYSQL_DATABASE_URL and POSTGRES_DATABASE_URL.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy missing rows from source to target
    Run {
        /// Dry run: plan every table without inserting rows
        #[arg(long)]
        dry_run: bool,

        /// Override rows per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override number of concurrent chunks
        #[arg(long)]
        workers: Option<usize>,

        /// Treat equal source and target row counts as already in sync
        #[arg(long)]
        trust_equal_counts: bool,

        /// Skip realigning target sequences after the run
        #[arg(long)]
        no_sequence_sync: bool,

        /// Only migrate these tables (repeatable)
        #[arg(long = "table", value_name = "NAME")]
        tables: Vec<String>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,

    /// List registry tables in processing order
    Tables,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    // Listing the registry needs neither logging nor a connection
    if let Commands::Tables = cli.command {
        let registry = match &cli.config {
            Some(path) => Config::load(path)?.registry()?,
            None => TableRegistry::builtin(),
        };
        print_tables(&registry, cli.output_json)?;
        return Ok(());
    }

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = load_config(cli.config.as_ref())?;

    // Apply run overrides before auto-tuning so pool sizes follow them
    if let Commands::Run {
        chunk_size,
        workers,
        trust_equal_counts,
        no_sequence_sync,
        ref tables,
        ..
    } = cli.command
    {
        if let Some(size) = chunk_size {
            config.migration.chunk_size = Some(size);
        }
        if let Some(w) = workers {
            config.migration.max_concurrent_chunks = Some(w);
        }
        if trust_equal_counts {
            config.migration.trust_equal_counts = true;
        }
        if no_sequence_sync {
            config.migration.sync_sequences = false;
        }
        if !tables.is_empty() {
            config.migration.include_tables = tables.clone();
        }
        config.validate()?;
    }
    let config = config.with_auto_tuning();

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler()?;

    match cli.command {
        Commands::Tables => unreachable!(), // Handled above
        Commands::Run { dry_run, .. } => {
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.run(Some(cancel_token), dry_run).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result, dry_run);
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::connect(config).await?;
            let checks = orchestrator.validate().await;
            orchestrator.close().await;
            let checks = checks?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                let mismatched = checks.iter().filter(|c| !c.matches).count();
                println!(
                    "Validation completed: {}/{} tables match",
                    checks.len() - mismatched,
                    checks.len()
                );
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MySQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connection(
                    "health check failed",
                    "pinging source and target",
                ));
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, MigrateError> {
    match path {
        Some(path) => {
            let config = Config::load(path)?.with_env_overrides();
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => {
            let config = Config::from_env()?;
            info!("Loaded configuration from environment");
            Ok(config)
        }
    }
}

fn print_tables(registry: &TableRegistry, as_json: bool) -> Result<(), MigrateError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(registry.tables())?);
        return Ok(());
    }
    for table in registry.tables() {
        println!(
            "{:>3}  {:<32} ({})",
            table.dependency_rank,
            table.name,
            table.key_columns.join(", ")
        );
    }
    Ok(())
}

fn print_summary(result: &MigrationResult, dry_run: bool) {
    let status_msg = match result.status.as_str() {
        "cancelled" => "Migration cancelled!",
        _ if dry_run => "Dry run completed!",
        _ => "Migration completed!",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}/{}", result.tables_success, result.tables_total);
    println!("  Rows found: {}", result.rows_found);
    if dry_run {
        let pending: u64 = result.tables.iter().map(|t| t.pending).sum();
        println!("  Rows pending: {}", pending);
    } else {
        println!("  Rows migrated: {}", result.rows_transferred);
    }
    println!("  Rows skipped: {}", result.rows_skipped);
    println!("  Rows failed: {}", result.rows_failed);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }

    if !result.sequences.is_empty() {
        println!("\nSequences:");
        for report in &result.sequences {
            let generator = report.generator.as_deref().unwrap_or("-");
            let outcome = match &report.outcome {
                SequenceOutcome::Realigned { next_value, .. } => format!("next value {}", next_value),
                SequenceOutcome::SkippedEmpty => "skipped (empty table)".to_string(),
                SequenceOutcome::NoGenerator => "skipped (no generator)".to_string(),
                SequenceOutcome::Failed { message } => format!("FAILED: {}", message),
            };
            println!("  {:<32} {:<40} {}", report.table, generator, outcome);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    // SIGINT handler (Ctrl-C)
    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing current table, then syncing sequences...");
        token_int.cancel();
    });

    // SIGTERM handler
    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing current table, then syncing sequences...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only SIGINT/Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing current table, then syncing sequences...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
