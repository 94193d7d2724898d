use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. Honors `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once (later calls are no-ops), which keeps
/// it usable from both binaries embedding the crate and from tests.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
