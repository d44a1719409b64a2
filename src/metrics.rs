/*!
Process-global Prometheus metrics (§6 "Metrics", §5 "Shared-resource policy"): registered once
through an idempotent installer and updated from any task via the `metrics` facade's free
functions, so pipelines, writers and the broker adapter never need to share a handle.
*/
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DB_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Installs the global Prometheus recorder and returns the handle `http::metrics_handler` renders
/// on scrape. Safe to call more than once in tests; only the first call installs a recorder.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("db_write_duration_seconds".to_string()),
            DB_DURATION_BUCKETS,
        )?
        .install_recorder()?;
    Ok(handle)
}

pub fn record_kafka_message(pipeline: &'static str, topic: &str, afi: &str, action: &str) {
    metrics::counter!(
        "kafka_messages_total",
        "pipeline" => pipeline, "topic" => topic.to_string(), "afi" => afi.to_string(), "action" => action.to_string(),
    )
    .increment(1);
}

pub fn record_db_write(pipeline: &'static str, op: &'static str, duration: std::time::Duration) {
    metrics::histogram!("db_write_duration_seconds", "pipeline" => pipeline, "op" => op)
        .record(duration.as_secs_f64());
}

pub fn record_rows_affected(pipeline: &'static str, table: &'static str, op: &'static str, rows: u64) {
    metrics::counter!(
        "db_rows_affected_total",
        "pipeline" => pipeline, "table" => table, "op" => op,
    )
    .increment(rows);
}

pub fn record_history_dedup_conflict(topic: &str) {
    metrics::counter!("history_dedup_conflicts_total", "topic" => topic.to_string()).increment(1);
}

pub fn record_parse_error(stage: &'static str, reason: &'static str) {
    metrics::counter!("parse_errors_total", "stage" => stage, "reason" => reason).increment(1);
}

pub fn set_eor_seen(router_id: &str, table_name: &str, afi: &str) {
    metrics::gauge!(
        "eor_seen",
        "router_id" => router_id.to_string(), "table_name" => table_name.to_string(), "afi" => afi.to_string(),
    )
    .set(1.0);
}

pub fn set_last_msg_timestamp(
    pipeline: &'static str,
    router_id: &str,
    table_name: &str,
    afi: &str,
    unix_seconds: f64,
) {
    metrics::gauge!(
        "last_msg_timestamp_seconds",
        "pipeline" => pipeline, "router_id" => router_id.to_string(), "table_name" => table_name.to_string(), "afi" => afi.to_string(),
    )
    .set(unix_seconds);
}

pub fn record_batch_size(pipeline: &'static str, size: usize) {
    metrics::histogram!("batch_size", "pipeline" => pipeline).record(size as f64);
}

pub fn record_batch_dropped(pipeline: &'static str) {
    metrics::counter!("batch_dropped_total", "pipeline" => pipeline).increment(1);
}

pub fn record_routes_purged(reason: &'static str, count: u64) {
    metrics::counter!("routes_purged_total", "reason" => reason).increment(count);
}
