//! Tracing subscriber setup for binaries and test harnesses embedding the crate.
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Install a global `fmt` subscriber.
///
/// `filter` takes precedence over `RUST_LOG`; without either, logs at
/// [`DEFAULT_FILTER`]. A subscriber installed earlier stays in place.
pub fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
