//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Changelog production and fan-out
//! - Serve-side (pull) traffic and rejections
//! - Fetch/apply performance per peer
//! - Topology churn and resyncs
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `cluster_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current
//! state, histograms track distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a local change queued for replication, with fan-out width.
pub fn record_change_queued(stream: &str, peers: usize) {
    counter!("cluster_changes_queued_total", "stream" => stream.to_string()).increment(1);
    counter!("cluster_change_fanout_total", "stream" => stream.to_string())
        .increment(peers as u64);
}

/// Gauge for the highest changelog sequence produced locally.
pub fn set_produced(stream: &str, seq: i64) {
    gauge!("cluster_changelog_produced", "stream" => stream.to_string()).set(seq as f64);
}

/// Record a served updates window.
pub fn record_serve(stream: &str, served: usize, retired: usize) {
    counter!("cluster_serves_total", "stream" => stream.to_string()).increment(1);
    counter!("cluster_entities_served_total", "stream" => stream.to_string())
        .increment(served as u64);
    if retired > 0 {
        counter!("cluster_entries_retired_total", "stream" => stream.to_string())
            .increment(retired as u64);
    }
}

/// Record a rejected updates request.
pub fn record_serve_rejected(stream: &str, reason: &str) {
    counter!(
        "cluster_serves_rejected_total",
        "stream" => stream.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a stream fetch attempt against a peer.
pub fn record_fetch(peer: &str, stream: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cluster_fetches_total",
        "peer" => peer.to_string(),
        "stream" => stream.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record fetch round-trip latency.
pub fn record_fetch_latency(peer: &str, stream: &str, duration: Duration) {
    histogram!(
        "cluster_fetch_duration_seconds",
        "peer" => peer.to_string(),
        "stream" => stream.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record entities applied from a fetched batch.
pub fn record_batch_applied(peer: &str, stream: &str, count: usize) {
    counter!(
        "cluster_entities_applied_total",
        "peer" => peer.to_string(),
        "stream" => stream.to_string()
    )
    .increment(count as u64);
}

/// Record a completed replication job.
pub fn record_job(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("cluster_jobs_total", "status" => status).increment(1);
}

/// Record a job whose peer vanished before completion.
pub fn record_job_discarded() {
    counter!("cluster_jobs_discarded_total").increment(1);
}

/// Gauge for the number of tracked peers.
pub fn set_tracked_peers(count: usize) {
    gauge!("cluster_tracked_peers").set(count as f64);
}

/// Record a peer garbage-collected out of the registry.
pub fn record_peer_retired() {
    counter!("cluster_peers_retired_total").increment(1);
}

/// Record a changelog rebuild, with the entity count re-queued.
pub fn record_peer_resync(entities: usize) {
    counter!("cluster_peer_resyncs_total").increment(1);
    counter!("cluster_resync_entities_total").increment(entities as u64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting.
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("cluster_engine_state").set(value);
}
