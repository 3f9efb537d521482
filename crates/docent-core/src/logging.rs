//! Tracing subscriber bootstrap for surfaces embedding the pipeline.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (usually
/// `general.log_level` from the config) is used. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
