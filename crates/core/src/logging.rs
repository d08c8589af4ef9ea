use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `default_filter`
/// (e.g. `"info"` or `"priosched=debug"`). A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
