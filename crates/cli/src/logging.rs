//! Logging setup
//!
//! `QUEUECTL_LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides the filter.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "queuectl=info,queuectl_core=info,queuectl_infra_sqlite=warn,queuectl_infra_system=info";

pub fn init(verbose: bool) -> Result<()> {
    let log_format =
        std::env::var("QUEUECTL_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let default_filter = if verbose {
        "queuectl=debug,queuectl_core=debug,queuectl_infra_sqlite=debug,queuectl_infra_system=debug"
    } else {
        DEFAULT_FILTER
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| anyhow!("Failed to create env filter: {}", e))?;

    // Logs go to stderr so command output on stdout stays clean
    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}
