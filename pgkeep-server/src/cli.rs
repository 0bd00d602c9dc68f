use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (environment variables are used otherwise)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run scheduled backups and serve the status API
    Daemon,

    /// Run a backup now (local unless --provider is given)
    Backup {
        /// Upload to this remote provider
        #[arg(short, long)]
        provider: Option<String>,

        /// Also write a local backup when --provider is given
        #[arg(long)]
        local: bool,

        /// Deadline in minutes
        #[arg(short, long, value_name = "MINUTES", default_value_t = 30)]
        timeout: u64,
    },

    /// Restore a backup into the configured database
    Restore {
        /// `local` or a provider name
        #[arg(short, long)]
        source: String,

        /// Short ID shown by `list`
        #[arg(long, conflicts_with = "latest", required_unless_present = "latest")]
        id: Option<String>,

        /// Restore the newest backup
        #[arg(long)]
        latest: bool,

        /// Deadline in minutes, including the wait for the restore lock
        #[arg(short, long, value_name = "MINUTES", default_value_t = 120)]
        timeout: u64,
    },

    /// List backups in `local` or a provider
    List { source: String },
}
