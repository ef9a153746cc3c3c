use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// The host calls this once; repeated calls are no-ops so embedded tests can
/// call it freely. `RUST_LOG` overrides the configured level.
pub fn init(config: Option<&LoggingConfig>) {
    let level = config
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");

    let filters = config
        .and_then(|l| l.filters.as_deref())
        .unwrap_or("");

    let filter_str = if filters.is_empty() {
        level.to_string()
    } else {
        format!("{level},{filters}")
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
