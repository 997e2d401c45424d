//! Prometheus metrics for sync runs
//!
//! The job exposes no listening socket; metrics are rendered in the text
//! exposition format and, when configured, written to a textfile for a
//! node-exporter style collector.
//!
//! Metrics include:
//! - source runs by outcome
//! - rows written per table
//! - skipped items per source
//! - rate-limit waits and HTTP requests by status
//! - per-source run duration

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramOpts,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use std::path::Path;
use tracing::{debug, error};

use crate::error::Result;

// Source run counter
static SOURCE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sync_source_runs_total",
        "Number of source runs by outcome",
        &["source", "outcome"]
    )
    .expect("Failed to create source_runs metric")
});

// Rows written per table
static ROWS_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sync_rows_written_total",
        "Data rows written to the store per table",
        &["table"]
    )
    .expect("Failed to create rows_written metric")
});

// Items skipped during normalization
static ITEMS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sync_items_skipped_total",
        "Remote items skipped because they could not be normalized",
        &["source"]
    )
    .expect("Failed to create items_skipped metric")
});

// Rate-limit waits
static RATE_LIMIT_WAITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sync_rate_limit_waits_total",
        "Times a request was delayed and resent after a 429",
        &["source"]
    )
    .expect("Failed to create rate_limit_waits metric")
});

// HTTP requests by status
static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sync_http_requests_total",
        "Outbound HTTP requests by source and status code",
        &["source", "status"]
    )
    .expect("Failed to create http_requests metric")
});

// Source duration histogram (seconds)
static SOURCE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];
    register_histogram_vec!(
        HistogramOpts::new(
            "sync_source_duration_seconds",
            "Wall time of one source's resolve, fetch and save"
        )
        .buckets(buckets),
        &["source"]
    )
    .expect("Failed to create source_duration metric")
});

// Last completed run (unix seconds)
static LAST_RUN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sync_last_run_timestamp_seconds",
        "Unix time at which the last full run finished"
    )
    .expect("Failed to create last_run metric")
});

pub fn record_source_run(source: &str, outcome: &str, duration_secs: f64) {
    SOURCE_RUNS.with_label_values(&[source, outcome]).inc();
    SOURCE_DURATION
        .with_label_values(&[source])
        .observe(duration_secs);
}

pub fn record_rows_written(table: &str, rows: usize) {
    ROWS_WRITTEN
        .with_label_values(&[table])
        .inc_by(rows as u64);
}

pub fn record_items_skipped(source: &str, count: usize) {
    if count > 0 {
        ITEMS_SKIPPED
            .with_label_values(&[source])
            .inc_by(count as u64);
    }
}

pub fn record_rate_limit_wait(source: &str) {
    RATE_LIMIT_WAITS.with_label_values(&[source]).inc();
}

pub fn record_http_request(source: &str, status: u16) {
    HTTP_REQUESTS
        .with_label_values(&[source, &status.to_string()])
        .inc();
}

pub fn record_run_finished(unix_secs: i64) {
    LAST_RUN.set(unix_secs);
}

/// Renders all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Writes the rendered metrics to `path` via a temp file and rename.
pub async fn write_textfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let temp_path = path.with_extension("prom.tmp");
    tokio::fs::write(&temp_path, render()).await?;
    tokio::fs::rename(&temp_path, path).await?;
    debug!(path = %path.display(), "Metrics textfile written");
    Ok(())
}
