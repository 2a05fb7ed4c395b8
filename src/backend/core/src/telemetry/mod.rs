//! Telemetry: structured logging and authorization metrics.
//!
//! - **Logging**: JSON/pretty/compact `tracing-subscriber` output with
//!   per-module levels
//! - **Metrics**: decision, error and cache counters via the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use orgauth_core::config::Config;
//! use orgauth_core::telemetry::init_telemetry;
//!
//! let config = Config::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{describe_metrics, AuthzMetrics, DecisionEngine, EvaluationTimer};

use crate::config::Config;

/// Install the log subscriber and register metric descriptions.
///
/// Call once at process startup.
pub fn init_telemetry(config: &Config) -> anyhow::Result<()> {
    describe_metrics();
    init_logging(&config.logging, config.environment)?;

    tracing::info!(
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Telemetry initialized"
    );
    Ok(())
}
