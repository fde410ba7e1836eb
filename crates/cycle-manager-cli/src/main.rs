mod config;
mod cost_report_cmd;
mod status_cmd;
#[cfg(test)]
mod test_util;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cycle_manager_core::orchestrator::{self, CycleOrchestratorConfig};
use cycle_manager_db::pool;

use config::CycleManagerConfig;

#[derive(Parser)]
#[command(name = "cyclemgr", about = "Self-healing control loop for an autonomous agent fleet")]
struct Cli {
    /// Database URL (overrides CYCLE_MANAGER_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a cyclemgr config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/cycle_manager")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database (if missing) and run migrations
    DbInit,
    /// Run one pass of every cleaner, requeuer, and monitor, then exit
    Tick,
    /// Run the cycle orchestrator loop until interrupted (SIGINT/SIGTERM)
    Run,
    /// Show a read-only snapshot of queue depth, agent fleet, and the cycle
    Status,
    /// Show a token-cost breakdown over a trailing window
    CostReport {
        /// Number of trailing days to report over
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `cyclemgr db-init` to create and migrate the database.");

    Ok(())
}

/// Create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CycleManagerConfig::resolve(cli_db_url)?;

    println!("Initializing cycle manager database...");

    pool::ensure_database_exists(&resolved.db_config).await?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("cyclemgr db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Tick => {
            let resolved = CycleManagerConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let orchestrator_config = CycleOrchestratorConfig::from_env();
            orchestrator::run_one_tick(&db_pool, &orchestrator_config).await;
            db_pool.close().await;
            println!("Tick complete.");
        }
        Commands::Run => {
            let resolved = CycleManagerConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let orchestrator_config = CycleOrchestratorConfig::from_env();
            let cancel = CancellationToken::new();

            let shutdown_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    shutdown_cancel.cancel();
                }
            });

            let result =
                orchestrator::run_cycle_orchestrator(&db_pool, &orchestrator_config, cancel)
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status => {
            let resolved = CycleManagerConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::CostReport { days } => {
            let resolved = CycleManagerConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cost_report_cmd::run_cost_report(&db_pool, days).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
