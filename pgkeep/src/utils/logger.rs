//! Logging configuration using tracing.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Initialize logging with the specified default level.
///
/// `RUST_LOG` takes precedence when set. Child process output is logged under the
/// `pgkeep::process` target, so `RUST_LOG=info,pgkeep::process=warn` silences
/// `pg_dump --verbose` chatter without hiding anything else.
pub fn init(level: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
}
