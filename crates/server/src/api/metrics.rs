//! Prometheus metrics recording and background collection.

use crate::coordinator::Coordinator;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a document write. `outcome` is `ok` or `error`.
pub fn record_write_operation(operation: &str, outcome: &str) {
    counter!(
        "lodestone_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Records items committed by a bulk request.
pub fn record_bulk_operation(operation: &str, count: usize) {
    counter!("lodestone_bulk_items_total", "operation" => operation.to_string())
        .increment(count as u64);
}

/// Records a search and its latency.
pub fn record_search_operation(search_type: &str, duration: Duration) {
    counter!("lodestone_search_total", "type" => search_type.to_string()).increment(1);
    histogram!("lodestone_search_duration_seconds", "type" => search_type.to_string())
        .record(duration.as_secs_f64());
}

/// Updates node-level gauges from the coordinator's current state.
pub fn update_node_metrics(coordinator: &Coordinator) {
    let stats = coordinator.stats();
    gauge!("lodestone_documents_total").set(stats.index.document_count as f64);
    gauge!("lodestone_terms_total").set(stats.index.term_count as f64);

    let node = coordinator.get_node();
    gauge!("lodestone_current_term").set(node.current_term as f64);
    gauge!("lodestone_is_leader").set(if node.state == "leader" { 1.0 } else { 0.0 });
    if let Some(index) = node.last_applied {
        gauge!("lodestone_last_applied_index").set(index as f64);
    }
    if let Some(index) = node.snapshot_index {
        gauge!("lodestone_last_snapshot_index").set(index as f64);
    }
}
