//! PostgreSQL backup lifecycle coordinator.
//!
//! Scheduled dumps streamed through gzip and optional age encryption, retention of local
//! artifacts, rotating remote copies, a catalog with short IDs, and a restore path that
//! scheduled backups never overlap.

pub mod artifact;
pub mod catalog;
pub(crate) mod codec;
pub mod config;
pub mod coordinator;
pub mod encryption;
pub mod lock;
pub mod notify;
pub mod process;
pub mod producer;
pub mod remote;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::Error;
pub type Result<T> = std::result::Result<T, Error>;
