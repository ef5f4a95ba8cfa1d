//! trawl daemon: entry point for running a mining pool instance.

mod config;
mod pool;
mod shutdown;

use clap::Parser;
use std::path::PathBuf;
use trawl_utils::LogFormat;

use crate::config::PoolConfig;
use crate::pool::Pool;

#[derive(Parser)]
#[command(name = "trawl-daemon", about = "Mining pool job refresher and payout engine")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base; CLI
    /// flags and env vars override them.
    #[arg(long, env = "TRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the ledger.
    #[arg(long, env = "TRAWL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TRAWL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TRAWL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the job refresher and the periodic payout loop.
    Run,
    /// Repair payments left pending by a crashed payout run, then exit.
    ResolvePayouts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => PoolConfig::from_toml_file(path)?,
        None => PoolConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    let log_format = match cli.log_format {
        Some(format) => format,
        None => config
            .log_format
            .parse::<LogFormat>()
            .map_err(anyhow::Error::msg)?,
    };
    trawl_utils::init_logging(log_format, &config.log_level);

    if let Some(ref path) = cli.config {
        tracing::info!("loaded config from {}", path.display());
    }
    config.validate()?;

    match cli.command {
        Command::Run => {
            tracing::info!(
                name = %config.name,
                data_dir = %config.data_dir.display(),
                "starting trawl pool"
            );
            let mut pool = Pool::new(config)?;
            pool.start().await?;

            pool.shutdown_controller().wait_for_signal().await;
            pool.stop().await;
            tracing::info!("trawl daemon exited cleanly");
        }
        Command::ResolvePayouts => {
            tracing::info!("running payout resolution");
            let pool = Pool::new(config)?;
            pool.resolve_payouts().await?;
        }
    }

    Ok(())
}
