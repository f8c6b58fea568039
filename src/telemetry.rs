use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_sdk::Resource;
use secrecy::ExposeSecret;
use tonic::metadata::MetadataMap;
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::configuration::TelemetrySettings;

/// Installs the global subscriber: an `RUST_LOG`-overridable filter, a
/// formatting layer writing to `sink`, and an OTLP exporter when enabled.
pub fn init_subscriber<Sink>(
    name: String,
    env_filter: String,
    sink: Sink,
    settings: &TelemetrySettings,
) -> anyhow::Result<()>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    LogTracer::init().context("Failed to set logger")?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = fmt::layer().with_writer(sink);

    let registry = Registry::default().with(env_filter).with(formatting_layer);
    if let Some(open_telemetry_tracer) = telemetry_layer(name, settings)? {
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(open_telemetry_tracer);
        let registry = registry.with(telemetry_layer);

        set_global_default(registry).context("Failed to set subscriber")
    } else {
        set_global_default(registry).context("Failed to set subscriber")
    }
}

/// The OTLP tracer, or `None` when export is disabled. A malformed API key
/// is an error rather than a silently untraced service.
pub fn telemetry_layer(
    name: String,
    settings: &TelemetrySettings,
) -> anyhow::Result<Option<Tracer>> {
    if !settings.enabled {
        return Ok(None);
    }
    let mut meta_data = MetadataMap::new();
    meta_data.insert(
        "x-honeycomb-team",
        settings
            .api_key
            .expose_secret()
            .parse()
            .context("The telemetry api key is not a valid metadata value")?,
    );
    let open_telemetry_tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_metadata(meta_data)
                .with_endpoint(&settings.endpoint)
                .with_tls_config(Default::default()),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_resource(Resource::new(vec![KeyValue::new("service.name", name)])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .context("Failed to install the OpenTelemetry tracer")?;
    Ok(Some(open_telemetry_tracer))
}

/// Flushes spans still buffered by the OTLP exporter.
pub fn shutdown_telemetry(settings: &TelemetrySettings) {
    if settings.enabled {
        opentelemetry::global::shutdown_tracer_provider();
    }
}
