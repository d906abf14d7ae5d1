//! hidtray CLI
//!
//! Runs the device monitor in the foreground, or inspects what is attached.

use clap::Parser;
use hidtray::Settings;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for --json
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(Settings::default_path);

    match cli.command.unwrap_or_default() {
        Commands::Run { json, export_dir } => {
            commands::daemon::run(config_path, json, export_dir).await
        }
        Commands::List => commands::utility::list(),
        Commands::InitConfig { force } => commands::utility::init_config(&config_path, force),
    }
}
