//! Bot relay - moves outbox events to the broker from whichever instance holds
//! the leadership lease.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relay_core::{init_logging, LogConfig, RelayConfig};

/// Outbox relay command-line interface.
#[derive(Parser)]
#[command(name = "bot-relay")]
#[command(about = "Leader-elected outbox relay for the bot platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file. Missing files fall back to defaults.
    #[arg(short, long, default_value = "bot-relay.json", global = true)]
    config: PathBuf,

    /// Redis URL (overrides the config file and REDIS_URL)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Identity used when competing for leadership
    #[arg(long, global = true)]
    instance_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Also write JSON lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the election and the relay until Ctrl-C
    Run,
    /// Print the current leader and outbox depth
    Status,
}

fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = RelayConfig::load(&cli.config)?;
    if let Some(url) = &cli.redis_url {
        config.redis_url = url.clone();
    }
    if let Some(instance_id) = &cli.instance_id {
        config.instance_id = instance_id.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_logging(LogConfig {
        service_name: "bot-relay".into(),
        default_level: config.log_level.clone(),
        log_path: cli.log_file.clone(),
    });

    match cli.command {
        Some(Commands::Run) | None => app::run_relay(config).await?,
        Some(Commands::Status) => app::check_status(&config).await?,
    }

    Ok(())
}
