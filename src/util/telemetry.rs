//! OTLP export of spans, logs and metrics, or a console-only fallback when no collector is
//! configured.

use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Var;
use crate::var;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const LOG_FILTER: &str = "rewards_ledger_server=debug,tower_http=debug,axum=debug,sqlx=info,info";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Providers registered with the global subscriber; hold on to it until shutdown
pub struct Telemetry {
    tracer_name: &'static str,
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub async fn new() -> Result<Telemetry> {
        let collector_url = var!(Var::OtelExporterEndpoint).await?;
        let protocol = var!(Var::OtelExporterProto).await?;
        let tracer_name = var!(Var::ApiTracerName).await?;
        let service_name = var!(Var::ApiServiceName).await?;

        if !protocol.eq_ignore_ascii_case("grpc") {
            return Err(format!("unsupported otlp protocol '{protocol}' (only grpc is built)").into());
        }

        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(signal_url(collector_url, "logs"))
            .with_timeout(EXPORT_TIMEOUT)
            .build()?;
        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(signal_url(collector_url, "traces"))
            .with_timeout(EXPORT_TIMEOUT)
            .build()?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(signal_url(collector_url, "metrics"))
            .with_timeout(EXPORT_TIMEOUT)
            .build()?;

        Ok(Self {
            tracer_name,
            logger_provider: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource.clone())
                .build(),
            tracer_provider: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_id_generator(RandomIdGenerator::default())
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(resource.clone())
                .build(),
            meter_provider: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource)
                .build(),
        })
    }

    pub fn register(self) -> Self {
        global::set_tracer_provider(self.tracer_provider.clone());
        let tracer = global::tracer(self.tracer_name);

        tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(OpenTelemetryTracingBridge::new(&self.logger_provider))
            .with(tracing_opentelemetry::MetricsLayer::new(
                self.meter_provider.clone(),
            ))
            .with(EnvFilter::new(LOG_FILTER))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .init();

        self
    }

    /// Flushes whatever is still batched; errors are reported but never fatal on the way out
    pub fn shutdown(self) {
        let results = [
            ("metering", self.meter_provider.shutdown()),
            ("logging", self.logger_provider.shutdown()),
            ("tracing", self.tracer_provider.shutdown()),
        ];

        for (signal, result) in results {
            if let Err(e) = result {
                eprintln!("error during {signal} shutdown: {e:?}");
            }
        }
    }
}

/// Console-only subscriber for local runs without a collector. Spans are printed by
/// `opentelemetry_stdout` instead of being exported.
pub fn init_stdout() -> SdkTracerProvider {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .build();

    global::set_tracer_provider(provider.clone());
    let tracer = global::tracer("rewards-ledger-stdout");

    tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(EnvFilter::new(LOG_FILTER))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    provider
}

/// Per-signal OTLP path under the collector root
fn signal_url(collector_url: &str, signal: &str) -> String {
    format!("{}/v1/{signal}", collector_url.trim_end_matches('/'))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signal_urls() {
        assert_eq!(
            signal_url("http://collector:4317/", "traces"),
            "http://collector:4317/v1/traces"
        );
        assert_eq!(
            signal_url("http://collector:4317", "metrics"),
            "http://collector:4317/v1/metrics"
        );
    }
}
