//! Helpers shared by the demo binaries.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber honouring `RUST_LOG`, `info` by default.
pub fn setup_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call in the same process keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
