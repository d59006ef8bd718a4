//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Capture throughput and gate rejections
//! - Records fetched, applied, and failed per stream
//! - Watermark position and tick duration
//! - Pruning volume
//! - Local store retry pressure
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `graph_replication_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.

use crate::audit::StreamKind;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a capture that produced a Transaction Record.
pub fn record_capture(audits: usize) {
    counter!("graph_replication_captures_total").increment(1);
    counter!("graph_replication_audits_captured_total").increment(audits as u64);
}

/// Record a transaction the Judge rejected (no record produced).
pub fn record_gate_rejection() {
    counter!("graph_replication_gate_rejections_total").increment(1);
}

/// Record a capture aborted by a sentinel entity.
pub fn record_sentinel_skip() {
    counter!("graph_replication_sentinel_skips_total").increment(1);
}

/// Record an entity dropped from capture (unresolvable natural key).
pub fn record_capture_dropped() {
    counter!("graph_replication_capture_dropped_entities_total").increment(1);
}

/// Record records fetched from the remote source.
pub fn record_records_fetched(stream: StreamKind, count: usize) {
    counter!("graph_replication_records_fetched_total", "stream" => stream.as_str())
        .increment(count as u64);
}

/// Record one record fully or partially applied.
pub fn record_record_applied(stream: StreamKind, audits_applied: usize, audits_failed: usize) {
    counter!("graph_replication_records_applied_total", "stream" => stream.as_str()).increment(1);
    counter!("graph_replication_audits_applied_total", "stream" => stream.as_str())
        .increment(audits_applied as u64);
    if audits_failed > 0 {
        counter!("graph_replication_audits_failed_total", "stream" => stream.as_str())
            .increment(audits_failed as u64);
    }
}

/// Record a record that failed to replay and was skipped.
pub fn record_replay_failure(stream: StreamKind) {
    counter!("graph_replication_replay_failures_total", "stream" => stream.as_str()).increment(1);
}

/// Record a tick degraded to a no-op by remote unavailability.
pub fn record_remote_unavailable(stream: StreamKind) {
    counter!("graph_replication_remote_unavailable_total", "stream" => stream.as_str())
        .increment(1);
}

/// Set the current watermark position (epoch ms).
pub fn set_watermark(stream: StreamKind, timestamp: i64) {
    gauge!("graph_replication_watermark_ms", "stream" => stream.as_str()).set(timestamp as f64);
}

/// Record pruned local records.
pub fn record_pruned(stream: StreamKind, count: u64) {
    counter!("graph_replication_records_pruned_total", "stream" => stream.as_str())
        .increment(count);
}

/// Record a failed prune attempt (retried next tick).
pub fn record_prune_failure(stream: StreamKind) {
    counter!("graph_replication_prune_failures_total", "stream" => stream.as_str()).increment(1);
}

/// Record the duration of one scheduler tick.
pub fn record_tick_duration(stream: StreamKind, duration: Duration) {
    histogram!("graph_replication_tick_duration_seconds", "stream" => stream.as_str())
        .record(duration.as_secs_f64());
}

/// Record a SQLite busy retry in a local store.
pub fn record_store_retry(operation: &str) {
    counter!("graph_replication_store_retries_total", "operation" => operation.to_string())
        .increment(1);
}

/// Set the worker state gauge (1 = running, 0 = stopped).
pub fn set_stream_state(stream: StreamKind, running: bool) {
    gauge!("graph_replication_stream_running", "stream" => stream.as_str())
        .set(if running { 1.0 } else { 0.0 });
}
