//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Build the log filter: `RUST_LOG` when set, otherwise `level` for this
/// crate and warnings for everything else
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("warn,livegate={level}"))
            .unwrap_or_else(|_| EnvFilter::new("warn,livegate=info"))
    })
}

/// Install the global subscriber
///
/// Safe to call more than once; only the first call installs anything.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .try_init();
}
