use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing_subscriber::fmt` layer driven by `RUST_LOG`
/// (defaulting to `info`). Safe to call more than once; only the first
/// call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .ok();
    });
}
