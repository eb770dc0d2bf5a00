use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder, HistogramOpts, HistogramVec,
    IntCounterVec, IntGaugeVec, TextEncoder,
};
use tracing::warn;

pub static INSERTS_RECEIVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analytics_inserts_received_total",
        "Insert notifications received, by merge outcome",
        &["worker_id", "outcome"]
    )
    .expect("register analytics_inserts_received_total")
});

pub static RECORDS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analytics_records_rejected_total",
        "Stored or announced records that failed validation",
        &["worker_id", "source"]
    )
    .expect("register analytics_records_rejected_total")
});

pub static AGGREGATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "analytics_aggregation_seconds",
        "Histogram of full re-aggregation durations",
        &["worker_id", "range"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .expect("register analytics_aggregation_seconds")
});

pub static STORE_FETCH_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("analytics_store_fetch_seconds", "Histogram of record store fetch durations")
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]);
    register_histogram_vec!(opts, &["worker_id"]).expect("register analytics_store_fetch_seconds")
});

pub static STORE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analytics_store_failures_total",
        "Record store operations that failed",
        &["worker_id", "operation", "reason"]
    )
    .expect("register analytics_store_failures_total")
});

pub static WORKING_SET_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "analytics_working_set_size",
        "Records held in the active window",
        &["worker_id", "range"]
    )
    .expect("register analytics_working_set_size")
});

pub static DETECTIONS_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "analytics_detections_ingested_total",
        "Face detections converted and stored, by polarity",
        &["worker_id", "polarity"]
    )
    .expect("register analytics_detections_ingested_total")
});

pub fn gather_metrics() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        warn!(error = %err, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
