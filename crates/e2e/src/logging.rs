//! Tracing setup for test binaries

use tracing_subscriber::EnvFilter;

/// Filter directives for harness logs, e.g. `TF_ACC_LOG=tfacc_e2e=debug`
pub const LOG_ENV: &str = "TF_ACC_LOG";

/// Install a stderr subscriber; later calls are no-ops
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
