// Telemetry module for structured logging and transfer metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` wins over the configured level when it is set.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(log_level)?,
    };

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");

    Ok(())
}

/// Build the filter for a configured level or directive list
fn level_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(log_level)
        .map_err(|e| anyhow::anyhow!("Failed to create env filter from '{}': {}", log_level, e))
}

/// Register descriptions for every metric the extractor emits
///
/// Metrics go to whatever recorder the host installed; without one they are no-ops.
pub fn describe_metrics() {
    describe_counter!(
        "extractor_files_transferred_total",
        "Total number of files retrieved successfully"
    );
    describe_counter!(
        "extractor_files_failed_total",
        "Total number of files that failed after all retries"
    );
    describe_counter!(
        "extractor_files_skipped_total",
        "Total number of files skipped by the incremental filter"
    );
    describe_counter!(
        "extractor_retries_total",
        "Total number of retried remote operations"
    );
    describe_histogram!(
        "extractor_bytes_transferred",
        "Size of retrieved files in bytes"
    );
}

#[inline]
pub fn record_file_transferred(job_name: &str, protocol: &str, bytes: u64) {
    counter!(
        "extractor_files_transferred_total",
        "job_name" => job_name.to_string(),
        "protocol" => protocol.to_string()
    )
    .increment(1);
    histogram!("extractor_bytes_transferred", "job_name" => job_name.to_string())
        .record(bytes as f64);
}

#[inline]
pub fn record_file_failed(job_name: &str, protocol: &str, kind: &str) {
    counter!(
        "extractor_files_failed_total",
        "job_name" => job_name.to_string(),
        "protocol" => protocol.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_files_skipped(job_name: &str, count: u64) {
    counter!("extractor_files_skipped_total", "job_name" => job_name.to_string())
        .increment(count);
}

/// Record one retried operation (connect, list or retrieve)
#[inline]
pub fn record_retry(protocol: &str, operation: &'static str) {
    counter!(
        "extractor_retries_total",
        "protocol" => protocol.to_string(),
        "operation" => operation
    )
    .increment(1);
}
