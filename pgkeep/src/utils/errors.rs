//! Error types for the backup coordinator.
//!
//! Each component has its own error enum; [`Error`] aggregates them for callers that
//! drive several components at once.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Failed to unlock {path}: {source}")]
    Unlock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Failures of an external tool (`pg_dump`, `pg_restore`).
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}")]
    Failed { tool: String, status: ExitStatus },

    #[error("Failed to wait for {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} did not finish before the deadline and was terminated")]
    DeadlineExceeded { tool: String },
}

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption key is empty")]
    EmptyKey,

    #[error("Decryption failed: {0}")]
    Decrypt(#[from] age::DecryptError),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to create backup directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create backup file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dump failed: {0}")]
    Dump(#[from] ProcessError),

    #[error("Failed to write backup stream: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Failed to stat backup file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup file {path} is empty")]
    EmptyArtifact { path: PathBuf },

    #[error("Restore in progress, backup skipped")]
    RestoreInProgress,

    #[error("Unknown or disabled provider: {0}")]
    UnknownProvider(String),

    #[error("Remote transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Remote backup did not finish before the deadline")]
    DeadlineExceeded,
}

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Failed to read backup directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("max_backups and retention_days are mutually exclusive")]
    ConflictingPolicy,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read backup directory {path}: {source}")]
    ReadLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown or disabled source: {0}")]
    UnknownSource(String),

    #[error("Failed to list {source_name}: {source}")]
    Remote {
        source_name: String,
        #[source]
        source: TransferError,
    },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid provider environment: {0}")]
    Environment(String),

    #[error("Failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed ({status}): {stderr}")]
    Failed {
        operation: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Failed to parse listing: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Remote object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable {0} is required")]
    MissingEnv(String),

    #[error("Environment variable {key} has an invalid value: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid schedule '{schedule}', expected HH:MM")]
    InvalidSchedule { schedule: String },

    #[error("Cron scheduler error: {0}")]
    Cron(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Scheduler already started")]
    AlreadyStarted,
}

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Timed out waiting for the restore lock")]
    LockTimeout,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("No backup with id {id} in {source_name}")]
    NotFound { id: String, source_name: String },

    #[error("No backups found in {0}")]
    NoBackups(String),

    #[error("Backup {0} is encrypted but no encryption key is configured")]
    MissingKey(String),

    #[error("Failed to download backup: {0}")]
    Download(#[source] TransferError),

    #[error("Restore deadline exceeded")]
    DeadlineExceeded,

    #[error("Failed to open backup file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("Failed to stream backup into restore: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Restore failed: {0}")]
    Process(#[from] ProcessError),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("All notifiers failed: {0}")]
    AllFailed(String),
}

/// Aggregate error for callers that drive several components.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Retention(#[from] RetentionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

pub type Result<T> = std::result::Result<T, Error>;
