// Tracing setup. The filter sits behind a reload layer so the level from the
// config file can be applied once it has been loaded.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Level used until the configuration is loaded.
const BOOT_LEVEL: &str = "info";

/// Installs the global subscriber. Safe to call more than once.
pub fn init_tracing() {
    let (filter, handle) = reload::Layer::new(filter_for(BOOT_LEVEL));
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches to the configured level. A set `RUST_LOG` keeps precedence.
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    if let Some(handle) = FILTER_HANDLE.get()
        && let Err(e) = handle.modify(|f| *f = EnvFilter::new(level))
    {
        tracing::warn!(level, error = %e, "Could not apply logging level");
    }
}

fn rust_log_is_set() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

/// `RUST_LOG` when it parses, otherwise `level`.
fn filter_for(level: &str) -> EnvFilter {
    if rust_log_is_set()
        && let Ok(filter) = EnvFilter::try_from_default_env()
    {
        return filter;
    }
    EnvFilter::new(level)
}
