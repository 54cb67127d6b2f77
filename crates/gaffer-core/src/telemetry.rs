//! Tracing subscriber setup for the orchestrator binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Console logging configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directives applied when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Emit JSON-structured lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Install the global subscriber. Call once at startup.
///
/// `RUST_LOG` wins over the configured filter; an unparseable configured
/// filter falls back to `info` rather than aborting startup.
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}
