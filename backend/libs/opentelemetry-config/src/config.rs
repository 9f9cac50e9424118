//! Tracing configuration structures

use serde::{Deserialize, Serialize};

/// Output format for log lines written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, one line per event
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Configuration for structured logging and distributed tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Export spans over OTLP (logging is always on)
    pub enabled: bool,

    /// OTLP collector endpoint
    /// Example: "http://jaeger:4317" (Jaeger with OTLP support)
    /// Example: "http://tempo:4317" (Grafana Tempo)
    pub otlp_endpoint: Option<String>,

    /// Sample rate (0.0 to 1.0)
    /// - 0.1: Sample 10% of traces (recommended for production)
    /// - 1.0: Sample all traces (development/debugging)
    pub sample_rate: f64,

    /// Service version (from Git tag or semantic versioning)
    pub service_version: String,

    /// Deployment environment (development, staging, production)
    pub environment: String,

    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: Some("http://jaeger:4317".to_string()),
            sample_rate: 0.1,
            service_version: "dev".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl TracingConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TRACING_ENABLED`: Enable span export (true/false)
    /// - `OTLP_ENDPOINT`: OTLP collector endpoint (default: http://jaeger:4317)
    /// - `TRACING_SAMPLE_RATE`: Sample rate (0.0-1.0)
    /// - `SERVICE_VERSION`: Service version
    /// - `APP_ENV`: Environment (development/staging/production)
    /// - `LOG_LEVEL`: Default filter directive (default: info)
    /// - `LOG_FORMAT`: `json` or `text`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("TRACING_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.enabled);

        let otlp_endpoint = std::env::var("OTLP_ENDPOINT")
            .ok()
            .or(defaults.otlp_endpoint);

        let sample_rate = std::env::var("TRACING_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.sample_rate)
            .clamp(0.0, 1.0);

        let service_version =
            std::env::var("SERVICE_VERSION").unwrap_or(defaults.service_version);

        let environment = std::env::var("APP_ENV").unwrap_or(defaults.environment);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_format = std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or(defaults.log_format);

        Self {
            enabled,
            otlp_endpoint,
            sample_rate,
            service_version,
            environment,
            log_level,
            log_format,
        }
    }

    /// Create production configuration
    pub fn production(service_version: &str) -> Self {
        Self {
            enabled: true,
            otlp_endpoint: Some("http://jaeger-collector:4317".to_string()),
            sample_rate: 0.1,
            service_version: service_version.to_string(),
            environment: "production".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }

    /// Create staging configuration
    pub fn staging(service_version: &str) -> Self {
        Self {
            enabled: true,
            otlp_endpoint: Some("http://jaeger-collector:4317".to_string()),
            sample_rate: 0.5,
            service_version: service_version.to_string(),
            environment: "staging".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }

    /// Create development configuration (trace everything, readable logs)
    pub fn development() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: Some("http://localhost:4317".to_string()),
            sample_rate: 1.0,
            service_version: "dev".to_string(),
            environment: "development".to_string(),
            log_level: "debug".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
