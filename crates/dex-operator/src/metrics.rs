//! Counters about client registrations.
//!
//! The counters are registered with the global [`opentelemetry`] meter provider. When an OTLP
//! endpoint is configured, [`init_meter_provider`] installs a provider periodically pushing them
//! to it.
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
use snafu::{ResultExt, Snafu};

use crate::cli::APP_NAME;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build the OTLP metric exporter for {endpoint:?}"))]
    BuildExporter {
        source: opentelemetry_otlp::ExporterBuildError,
        endpoint: String,
    },
}

/// Export settings of the operator metrics.
#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct MetricsOptions {
    /// OTLP gRPC endpoint the metrics are pushed to, e.g. `http://otel-collector:4317`.
    ///
    /// Metrics are not exported if unset.
    #[arg(long = "metrics-endpoint", env = "DEX_OPERATOR_METRICS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Interval between two metric exports.
    #[arg(
        long = "metrics-export-interval",
        env = "DEX_OPERATOR_METRICS_EXPORT_INTERVAL",
        default_value = "30s"
    )]
    pub export_interval: humantime::Duration,
}

/// Installs the global meter provider exporting to the configured endpoint.
///
/// Returns [`None`] if no endpoint is configured. The returned provider must be shut down before
/// the process exits, otherwise the last export is lost.
pub fn init_meter_provider(options: &MetricsOptions) -> Result<Option<SdkMeterProvider>> {
    let Some(endpoint) = &options.endpoint else {
        return Ok(None);
    };

    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
        .context(BuildExporterSnafu { endpoint })?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(*options.export_interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(Resource::builder().with_service_name(APP_NAME).build())
        .with_reader(reader)
        .build();
    global::set_meter_provider(provider.clone());
    tracing::info!(%endpoint, "exporting metrics");

    Ok(Some(provider))
}

pub trait ClientMetrics: Send + Sync {
    /// A client was registered with the identity provider.
    fn client_created(&self);

    /// Registering a client with the identity provider failed.
    fn client_failed(&self);
}

#[derive(Clone)]
pub struct OpenTelemetryClientMetrics {
    created: Counter<u64>,
    failed: Counter<u64>,
    attributes: Vec<KeyValue>,
}

impl OpenTelemetryClientMetrics {
    pub fn new(meter: &Meter, controller: &str) -> Self {
        OpenTelemetryClientMetrics {
            created: meter
                .u64_counter("client_created_total")
                .with_description("Number of clients registered with Dex")
                .build(),
            failed: meter
                .u64_counter("client_failures_total")
                .with_description("Number of clients which failed to register with Dex")
                .build(),
            attributes: vec![KeyValue::new("controller", controller.to_owned())],
        }
    }

    /// Creates the counters on the meter of the global provider.
    ///
    /// Must be called after [`init_meter_provider`], counters created earlier stay no-ops.
    pub fn global(controller: &str) -> Self {
        Self::new(&global::meter(APP_NAME), controller)
    }
}

impl ClientMetrics for OpenTelemetryClientMetrics {
    fn client_created(&self) {
        self.created.add(1, &self.attributes);
    }

    fn client_failed(&self) {
        self.failed.add(1, &self.attributes);
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::{
        InMemoryMetricExporter,
        data::{AggregatedMetrics, MetricData, ResourceMetrics},
    };

    use super::*;

    fn counter_value(exported: &[ResourceMetrics], name: &str) -> Option<u64> {
        exported
            .iter()
            .flat_map(|resource| resource.scope_metrics())
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == name)
            .find_map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                    Some(sum.data_points().map(|point| point.value()).sum())
                }
                _ => None,
            })
    }

    #[test]
    fn counters_reach_the_exporter() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        let metrics = OpenTelemetryClientMetrics::new(&provider.meter(APP_NAME), "client");

        metrics.client_created();
        metrics.client_created();
        metrics.client_failed();
        provider.force_flush().expect("flushing metrics must succeed");

        let exported = exporter
            .get_finished_metrics()
            .expect("exported metrics must be readable");
        assert_eq!(counter_value(&exported, "client_created_total"), Some(2));
        assert_eq!(counter_value(&exported, "client_failures_total"), Some(1));
    }

    #[test]
    fn no_endpoint_installs_no_provider() {
        let options = MetricsOptions {
            endpoint: None,
            export_interval: std::time::Duration::from_secs(30).into(),
        };

        assert!(
            init_meter_provider(&options)
                .expect("nothing to build")
                .is_none()
        );
    }
}
