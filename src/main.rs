use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use metastore_maint::{
    config::MetastoreConfig,
    db::DbPool,
    maintenance::{DbExecutionStore, MaintenanceHost, ScheduledExecutionsMaintTask, run_sweep_cycle},
    observability,
};
use tokio::sync::watch;

/// Config file picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "metastore.toml";

/// How long shutdown waits for in-flight maintenance cycles.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about = "Metastore maintenance service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./metastore.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run maintenance tasks periodically until interrupted (default)
    Serve,
    /// Run a single scheduled query execution sweep and exit
    SweepOnce,
    /// Run database migrations and exit
    Migrate,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::SweepOnce) => {
            run_sweep_once(args.config.as_deref()).await;
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

/// Resolve the config file to load, if any.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(None)
}

/// Load configuration and initialize logging, exiting on failure.
fn load_config(explicit_path: Option<&str>) -> (Option<PathBuf>, MetastoreConfig) {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match &config_path {
        Some(path) => match MetastoreConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => MetastoreConfig::default(),
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Loaded configuration"),
        None => tracing::info!("No config file found, using defaults"),
    }

    (config_path, config)
}

/// Connect to the configured database, applying migrations when enabled.
async fn connect_database(config: &MetastoreConfig) -> Arc<DbPool> {
    if config.database.is_none() {
        tracing::error!("Database is not configured");
        std::process::exit(1);
    }

    let pool = match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if config.database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        std::process::exit(1);
    }

    Arc::new(pool)
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config_path, config) = load_config(explicit_config_path);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }

    let db = connect_database(&config).await;
    let store = Arc::new(DbExecutionStore::new(&db, &config.scheduled_queries.execution));

    if config.scheduled_queries.enabled {
        tracing::info!(
            progress_timeout_secs = config.scheduled_queries.execution.progress_timeout_secs,
            max_age_secs = config.scheduled_queries.execution.max_age_secs,
            frequency_secs = config.scheduled_queries.execution.maint_task_frequency_secs,
            "Scheduled query execution maintenance enabled"
        );
    } else {
        tracing::info!("Scheduled query execution maintenance disabled by configuration");
    }

    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    let mut host = MaintenanceHost::new(config_rx);
    host.register(Arc::new(ScheduledExecutionsMaintTask::new(store)));
    host.start();

    wait_for_shutdown(config_path, &config_tx).await;

    tracing::info!("Shutdown signal received, waiting for maintenance tasks to complete...");
    host.shutdown(SHUTDOWN_TIMEOUT).await;
    tracing::info!("Shutdown complete");
}

/// Wait for SIGINT or SIGTERM, reloading configuration on SIGHUP.
#[cfg(unix)]
async fn wait_for_shutdown(
    config_path: Option<PathBuf>,
    config_tx: &watch::Sender<Arc<MetastoreConfig>>,
) {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    tokio::pin!(ctrl_c);

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install signal handler");
    let mut hangup = signal(SignalKind::hangup()).expect("failed to install signal handler");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return,
            _ = terminate.recv() => return,
            _ = hangup.recv() => reload_config(config_path.as_ref(), config_tx),
        }
    }
}

/// Wait for Ctrl+C. Configuration reload is not available on this platform.
#[cfg(not(unix))]
async fn wait_for_shutdown(
    config_path: Option<PathBuf>,
    config_tx: &watch::Sender<Arc<MetastoreConfig>>,
) {
    let _ = (config_path, config_tx);
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

/// Re-read the config file and publish it to running tasks.
///
/// Database and observability settings are only read at startup.
#[cfg_attr(not(unix), allow(dead_code))]
fn reload_config(config_path: Option<&PathBuf>, config_tx: &watch::Sender<Arc<MetastoreConfig>>) {
    let Some(path) = config_path else {
        tracing::warn!("Received SIGHUP but no config file is in use, ignoring");
        return;
    };

    match MetastoreConfig::from_file(path) {
        Ok(config) => {
            tracing::info!(
                config_file = %path.display(),
                enabled = config.scheduled_queries.enabled,
                progress_timeout_secs = config.scheduled_queries.execution.progress_timeout_secs,
                max_age_secs = config.scheduled_queries.execution.max_age_secs,
                "Configuration reloaded"
            );
            config_tx.send_replace(Arc::new(config));
        }
        Err(e) => {
            tracing::error!(
                config_file = %path.display(),
                error = %e,
                "Failed to reload configuration, keeping previous settings"
            );
        }
    }
}

async fn run_sweep_once(explicit_config_path: Option<&str>) {
    let (_, config) = load_config(explicit_config_path);
    let db = connect_database(&config).await;
    let store = DbExecutionStore::new(&db, &config.scheduled_queries.execution);

    run_sweep_cycle(&config.scheduled_queries, &store).await;
    tracing::info!("Sweep complete");
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (_, config) = load_config(explicit_config_path);

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    tracing::info!("Running database migrations");

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    }
}

/// Export the config JSON schema to file or stdout.
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match MetastoreConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}
