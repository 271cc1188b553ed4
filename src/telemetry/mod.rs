//! # Telemetry
//!
//! OpenTelemetry integration: exports spans for stage/unit/driver
//! operations so a run can be watched in Jaeger/Tempo/whatever OTLP
//! collector is configured, alongside plain console logging via
//! `tracing-subscriber`.
//!
//! Configuration is environment-driven (`OTEL_SERVICE_NAME`,
//! `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_TRACES_SAMPLER_ARG`) with CLI
//! flags able to override the endpoint and sampling.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP collector endpoint. `None` means console-only logging.
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio in `[0.0, 1.0]`.
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ben".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Initializes console logging and, if `config.otlp_endpoint` is set, an
/// OTLP trace exporter layered on top. Returns the `Tracer` when OTLP was
/// configured so callers can hold onto it if needed (the layer itself is
/// already registered globally either way).
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());

        let subscriber = tracing_subscriber::registry().with(env_filter).with(telemetry_layer);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetry initialized with OTLP export"
        );
        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!("telemetry initialized (console only, no OTLP)");
        Ok(None)
    }
}

fn init_otlp_tracer(service_name: &str, endpoint: &str, sampling_ratio: f64) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name.to_string())])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Flushes pending spans. Must be called before the process exits, or
/// the batch exporter's buffered spans are lost.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("telemetry shut down");
}

/// Span-attribute helpers for the scheduler's stage/unit/driver
/// operations, mirroring what the HTTP driver used to attach per-request
/// but generalized to any driver invocation.
#[allow(dead_code)]
pub mod instrumentation {
    use std::time::Instant;

    /// Attributes for one driver invocation within a unit's step.
    #[derive(Debug)]
    pub struct StepSpanContext {
        pub unit_name: String,
        pub step_index: usize,
        pub ctx: String,
        pub start_time: Instant,
        pub err_code: Option<String>,
        pub res_time_ms: Option<u64>,
    }

    impl StepSpanContext {
        pub fn new(unit_name: &str, step_index: usize, ctx: &str) -> Self {
            Self {
                unit_name: unit_name.to_string(),
                step_index,
                ctx: ctx.to_string(),
                start_time: Instant::now(),
                err_code: None,
                res_time_ms: None,
            }
        }

        pub fn finish(&mut self, err_code: &str) {
            self.err_code = Some(err_code.to_string());
            self.res_time_ms = Some(self.start_time.elapsed().as_millis() as u64);
        }

        pub fn attributes(&self) -> Vec<(&'static str, String)> {
            let mut attrs = vec![
                ("unit.name", self.unit_name.clone()),
                ("step.index", self.step_index.to_string()),
                ("step.ctx", self.ctx.clone()),
            ];
            if let Some(code) = &self.err_code {
                attrs.push(("step.err_code", code.clone()));
            }
            if let Some(ms) = self.res_time_ms {
                attrs.push(("step.res_time_ms", ms.to_string()));
            }
            attrs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "ben");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn step_span_context_records_outcome() {
        use instrumentation::StepSpanContext;

        let mut ctx = StepSpanContext::new("unit-a", 0, "http");
        ctx.finish("OK");

        assert_eq!(ctx.unit_name, "unit-a");
        assert_eq!(ctx.err_code, Some("OK".to_string()));
        assert!(ctx.res_time_ms.is_some());

        let attrs = ctx.attributes();
        assert!(attrs.iter().any(|(k, v)| *k == "step.ctx" && v == "http"));
        assert!(attrs.iter().any(|(k, v)| *k == "step.err_code" && v == "OK"));
    }
}
