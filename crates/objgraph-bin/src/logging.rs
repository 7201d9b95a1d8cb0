//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing once for the whole process.
///
/// `RUST_LOG` wins over the provided default level.
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
