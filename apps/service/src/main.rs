use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use uppe_engine::clock::SystemClock;
use uppe_engine::config::Config;
use uppe_engine::crypto::ChaChaSecretBox;
use uppe_engine::database::{Database, DatabaseImpl, MemoryDatabase};
use uppe_engine::monitoring::MonitoringExecutor;
use uppe_engine::notifications::TelegramSender;
use uppe_engine::orchestrator::Engine;

/// Uppe monitoring engine
#[derive(Parser)]
#[command(name = "uppe-engine")]
#[command(about = "Uppe monitoring engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "UPPE_CONFIG")]
    config: Option<PathBuf>,

    /// Keep all data in memory instead of the database file
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Check one monitor now and print its state
    Check { monitor_id: Uuid },
    /// Print the effective configuration
    Config,
}

async fn open_database(config: &Config, ephemeral: bool) -> Result<Arc<dyn Database>> {
    if ephemeral {
        info!("Using in-memory storage");
        return Ok(Arc::new(MemoryDatabase::new()));
    }

    let path = &config.engine.database_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    info!("Opening database at {}", path.display());
    Ok(Arc::new(DatabaseImpl::open(path).await?))
}

fn build_engine(config: &Config, database: Arc<dyn Database>) -> Result<Engine> {
    let clock = Arc::new(SystemClock);
    let prober = Arc::new(MonitoringExecutor::new(clock.clone())?);
    let mut builder = Engine::builder(database, prober).clock(clock).tick_period(config.tick_period());

    match ChaChaSecretBox::from_env(&config.notifications.secret_key_env) {
        Ok(secrets) => {
            let sender = TelegramSender::new(config.notifications.telegram_api_base.as_str())?;
            builder = builder.secrets(Arc::new(secrets)).sender(Arc::new(sender));
        }
        Err(e) => warn!("Notifications disabled: {}", e),
    }

    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref())?;
    logger::init_with(&config.logging.level, config.logging.format.parse().unwrap_or_default());

    let command = cli.command.unwrap_or(Command::Run);
    if let Command::Config = command {
        println!("{}", config);
        return Ok(());
    }

    let database = open_database(&config, cli.ephemeral).await?;
    let engine = build_engine(&config, database)?;

    match command {
        Command::Check { monitor_id } => {
            let state = engine.check_now(monitor_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Run | Command::Config => {
            engine.start();
            tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            if !engine.stop(config.shutdown_timeout()).await {
                warn!("Some checks were still running at shutdown");
            }
        }
    }

    Ok(())
}
