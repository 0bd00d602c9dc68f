//! Shared helpers: errors, logging, formatting.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{Error, Result};
pub use format::{format_bytes, format_duration};
