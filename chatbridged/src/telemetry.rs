use anyhow::{Context, Result};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use std::time::Duration;
use tracing::info;

/// Instruments recorded by the session registry and the bridge service.
pub struct BridgeMetrics {
    pub reply_latency: Histogram<f64>,
    pub sessions_opened: Counter<u64>,
    pub sessions_closed: Counter<u64>,
    pub transport_errors: Counter<u64>,
}

impl BridgeMetrics {
    pub fn new(meter: &Meter) -> Self {
        let reply_latency = meter
            .f64_histogram("chatbridge.reply.latency_ms")
            .with_description("Time spent waiting for backend replies in milliseconds")
            .build();

        let sessions_opened = meter
            .u64_counter("chatbridge.sessions.opened")
            .with_description("Backend sessions opened")
            .build();

        let sessions_closed = meter
            .u64_counter("chatbridge.sessions.closed")
            .with_description("Backend sessions closed")
            .build();

        let transport_errors = meter
            .u64_counter("chatbridge.transport.errors")
            .with_description("Backend connect or stream failures")
            .build();

        Self {
            reply_latency,
            sessions_opened,
            sessions_closed,
            transport_errors,
        }
    }

    pub fn record_reply(&self, operation: &str, completion: &str, duration_ms: f64) {
        self.reply_latency.record(
            duration_ms,
            &[
                KeyValue::new("operation", operation.to_string()),
                KeyValue::new("completion", completion.to_string()),
            ],
        );
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.add(1, &[]);
    }

    pub fn record_session_closed(&self, reason: &str) {
        self.sessions_closed
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.add(1, &[]);
    }
}

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);
const EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Export bridge metrics over OTLP/HTTP to `endpoint`. The returned provider
/// must be handed back to [`shutdown_telemetry`] to flush pending points.
pub fn init_telemetry(
    endpoint: &str,
    service_name: &str,
) -> Result<(SdkMeterProvider, BridgeMetrics)> {
    info!(endpoint, "exporting metrics over OTLP");

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_export_config(opentelemetry_otlp::ExportConfig {
            endpoint: Some(endpoint.to_string()),
            timeout: EXPORT_TIMEOUT,
            ..Default::default()
        })
        .build()
        .with_context(|| format!("building OTLP metric exporter for {endpoint}"))?;

    let provider = SdkMeterProvider::builder()
        .with_reader(
            opentelemetry_sdk::metrics::PeriodicReader::builder(
                exporter,
                opentelemetry_sdk::runtime::Tokio,
            )
            .with_interval(EXPORT_INTERVAL)
            .build(),
        )
        .with_resource(Resource::new([
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();
    global::set_meter_provider(provider.clone());

    let metrics = BridgeMetrics::new(&global::meter("chatbridged"));
    Ok((provider, metrics))
}

pub fn shutdown_telemetry(provider: SdkMeterProvider) -> Result<()> {
    provider
        .shutdown()
        .context("flushing OTLP metrics on shutdown")
}
