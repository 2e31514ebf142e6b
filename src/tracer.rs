use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Human-readable log output, filtered via `RUST_LOG` (defaults to `info`).
pub fn setup_simple_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|e| Error::General(e.to_string()))
}

/// One JSON object per line, for log shippers.
pub fn setup_json_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|e| Error::General(e.to_string()))
}
