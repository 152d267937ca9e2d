//! OpenTelemetry batch types and the sinks that consume them.
//!
//! The OTLP protobuf messages are the telemetry object model: the trace, log
//! and metric builders in this crate write straight into them, and a sink
//! receives whole export requests.
//!
//! ## Architecture
//!
//! ```text
//! Traces  = ExportTraceServiceRequest    (resource -> scope -> spans)
//! Logs    = ExportLogsServiceRequest     (resource -> scope per job -> records)
//! Metrics = ExportMetricsServiceRequest  (resource -> scope -> sums)
//! ```

pub mod attributes;
pub mod sink;

pub use sink::{CollectingSink, OtlpHttpSink, TelemetrySink};

pub use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest as Logs;
pub use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest as Metrics;
pub use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest as Traces;

/// Instrumentation scope name shared by every batch
pub const INSTRUMENTATION_SCOPE_NAME: &str = "ci-otel.githubactions";

/// Nanoseconds since the Unix epoch, saturating at zero for earlier times
pub fn unix_nanos(time: chrono::DateTime<chrono::Utc>) -> u64 {
    time.timestamp_nanos_opt()
        .map(|n| u64::try_from(n).unwrap_or(0))
        .unwrap_or(0)
}

/// Current time as nanoseconds since the Unix epoch
pub fn now_unix_nanos() -> u64 {
    unix_nanos(chrono::Utc::now())
}

/// Number of log records across every resource and scope
pub fn log_record_count(logs: &Logs) -> usize {
    logs.resource_logs
        .iter()
        .flat_map(|r| &r.scope_logs)
        .map(|s| s.log_records.len())
        .sum()
}

/// Number of spans across every resource and scope
pub fn span_count(traces: &Traces) -> usize {
    traces
        .resource_spans
        .iter()
        .flat_map(|r| &r.scope_spans)
        .map(|s| s.spans.len())
        .sum()
}

/// Number of data points across every metric
pub fn data_point_count(metrics: &Metrics) -> usize {
    use opentelemetry_proto::tonic::metrics::v1::metric::Data;

    metrics
        .resource_metrics
        .iter()
        .flat_map(|r| &r.scope_metrics)
        .flat_map(|s| &s.metrics)
        .map(|m| match &m.data {
            Some(Data::Sum(sum)) => sum.data_points.len(),
            Some(Data::Gauge(gauge)) => gauge.data_points.len(),
            _ => 0,
        })
        .sum()
}
