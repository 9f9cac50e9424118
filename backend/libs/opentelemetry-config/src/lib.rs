//! OpenTelemetry Configuration Library
//!
//! Centralized logging and distributed-tracing bootstrap for services that
//! publish or consume events. Installs the W3C trace-context propagator used
//! to carry trace IDs through Kafka headers, a `tracing` subscriber for
//! structured logs, and (when enabled) an OTLP span exporter.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod config;

pub use config::{LogFormat, TracingConfig};

/// Errors raised while installing the tracing pipeline
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("failed to install OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the W3C `traceparent`/`tracestate` propagator globally
///
/// Producers inject and consumers extract through whatever propagator is
/// installed here, so both sides of a topic must call this (directly or via
/// [`init_tracing`]) before handling messages.
pub fn install_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

/// Initialize logging and tracing for a service
///
/// Always installs the propagator and a fmt subscriber. When
/// `config.enabled` is set, spans are additionally exported over OTLP and the
/// returned tracer is `Some`.
///
/// # Example
/// ```no_run
/// use opentelemetry_config::{init_tracing, TracingConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let _tracer = init_tracing("order-consumer", &TracingConfig::from_env())
///         .expect("Failed to initialize tracing");
/// }
/// ```
pub fn init_tracing(
    service_name: &str,
    config: &TracingConfig,
) -> Result<Option<Tracer>, TelemetryError> {
    install_propagator();

    let tracer = if config.enabled {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ]);
        Some(init_otlp_tracer(config, resource)?)
    } else {
        None
    };

    let telemetry_layer = tracer
        .clone()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Text => fmt::layer().with_target(true).with_level(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(config)?)
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        otlp_export = config.enabled,
        sample_rate = config.sample_rate,
        "Tracing initialized"
    );

    Ok(tracer)
}

/// `RUST_LOG` wins; otherwise `config.log_level`
fn env_filter(config: &TracingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::InvalidFilter {
        directive: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Initialize OTLP exporter (works with Jaeger, Tempo, and other OTLP-compatible backends)
fn init_otlp_tracer(config: &TracingConfig, resource: Resource) -> Result<Tracer, TelemetryError> {
    let endpoint = config
        .otlp_endpoint
        .clone()
        .unwrap_or_else(|| "http://jaeger:4317".to_string());

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

/// Shutdown tracing gracefully
///
/// Call this before shutting down the service to ensure all spans are exported
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::TextMapPropagator;

    #[test]
    fn test_propagator_uses_w3c_headers() {
        install_propagator();

        let fields: Vec<String> =
            global::get_text_map_propagator(|p| p.fields().map(str::to_string).collect());

        assert!(fields.iter().any(|f| f == "traceparent"));
        assert!(fields.iter().any(|f| f == "tracestate"));
    }

    #[test]
    fn test_env_filter_from_config() {
        let config = TracingConfig {
            log_level: "info,event_pipeline=debug".to_string(),
            ..Default::default()
        };

        assert!(env_filter(&config).is_ok());
    }
}
