use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` takes precedence over `default_filter`.
pub fn init_logger(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn log_fetch(url: &str, bytes: usize, duration: std::time::Duration) {
    info!(
        target: "fetch",
        url = %url,
        bytes = bytes,
        duration_ms = %duration.as_millis(),
        "Fetch completed"
    );
}
