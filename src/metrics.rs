use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics exporter
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!("log_ingest_total", "Total number of log records ingested");
    describe_counter!("log_query_total", "Total number of log range queries");
    describe_histogram!(
        "log_query_duration_seconds",
        "Log range query duration in seconds"
    );
    describe_counter!(
        "log_records_skipped_total",
        "Indexed log records dropped from query results because they were missing or unreadable"
    );
    describe_counter!(
        "log_store_errors_total",
        "Total number of storage backend failures"
    );
    describe_gauge!(
        "log_aggregator_info",
        "Log aggregator version and build information"
    );

    gauge!("log_aggregator_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record an ingest attempt
///
/// Labelled by outcome only; service names are caller-supplied and unbounded.
pub fn record_ingest(status: &str) {
    counter!("log_ingest_total", "status" => status.to_string()).increment(1);
}

/// Record a query and its duration
pub fn record_query(status: &str, duration: Duration) {
    counter!("log_query_total", "status" => status.to_string()).increment(1);
    histogram!("log_query_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
}

/// Record index members dropped during query reassembly
pub fn record_skipped(count: u64) {
    counter!("log_records_skipped_total").increment(count);
}

/// Record a backend failure
pub fn record_store_error(operation: &str) {
    counter!("log_store_errors_total", "operation" => operation.to_string()).increment(1);
}
