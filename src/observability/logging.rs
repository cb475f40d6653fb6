//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "cloud_source_controller=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`; `format` selects `text` or `json` (default).
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(level: Option<&str>, format: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        level.map_or_else(
            || EnvFilter::new(DEFAULT_FILTER),
            |level| EnvFilter::new(format!("cloud_source_controller={level}")),
        )
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        Some("text") => builder.try_init(),
        _ => builder.json().flatten_event(true).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
