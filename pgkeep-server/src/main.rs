//! pgkeep - PostgreSQL backup daemon and command line.

mod cli;
mod commands;
mod error;
mod routes;
mod shutdown;
mod state;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use pgkeep::restore::BackupSelector;
use pgkeep::utils::logger;
use pgkeep::Config;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    logger::init(cli.log_level.as_deref().unwrap_or("info"))?;

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Daemon => commands::daemon::run(config).await,
        Command::Backup {
            provider,
            local,
            timeout,
        } => commands::backup::run(config, provider, local, minutes(timeout)).await,
        Command::Restore {
            source,
            id,
            latest: _,
            timeout,
        } => {
            let selector = match id {
                Some(id) => BackupSelector::ShortId(id),
                None => BackupSelector::Latest,
            };
            commands::restore::run(config, &source, selector, minutes(timeout)).await
        }
        Command::List { source } => commands::list::run(config, &source).await,
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}
