//! Structured logging for pipeline execution events.

use crate::telemetry::NodeStatus;

pub fn log_run_start(query_id: &str) {
    tracing::debug!(query_id = %query_id, "pipeline run starting");
}

pub fn log_run_complete(query_id: &str, total_ms: u64) {
    tracing::debug!(query_id = %query_id, total_ms, "pipeline run complete");
}

pub fn log_node_start(node_id: &str) {
    tracing::debug!(node = %node_id, "node executing");
}

pub fn log_node_complete(node_id: &str, status: NodeStatus, duration_ms: u64) {
    tracing::debug!(node = %node_id, status = ?status, duration_ms, "node complete");
}

pub fn log_node_error(node_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(node = %node_id, error = %error, "node failed");
}
