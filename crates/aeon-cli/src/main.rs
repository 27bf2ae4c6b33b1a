//! `aeon` — the assistant kernel binary.

use aeon_cli::{gateway, repl};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aeon_core::config::schema::LoggingConfig;
use aeon_core::config::{load_config, Config};

#[derive(Parser)]
#[command(name = "aeon", version, about = "Self-hosted assistant kernel")]
struct Cli {
    /// Path to config.json (default: ~/.aeon/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kernel: bus, agent loop, scheduler, channels.
    Run,
    /// Interactive chat against the local kernel.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config: Config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run => gateway::run(config).await,
        Commands::Chat => repl::run(config).await,
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.path.is_empty() {
        builder.with_writer(std::io::stderr).init();
    } else {
        let path = aeon_core::utils::expand_home(&logging.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(&path)?;
        builder.with_ansi(false).with_writer(Arc::new(file)).init();
    }
    Ok(())
}
