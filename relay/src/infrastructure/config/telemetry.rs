//! Logging and tracing settings.

use serde::Deserialize;

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name reported to the tracing backend.
    pub service_name: String,
    /// OTLP endpoint for traces. Tracing export is off when unset.
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio for traces.
    #[serde(default = "default_sampling")]
    pub sampling_ratio: f64,
    /// Default log filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

pub(super) fn default_sampling() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".into()
}
