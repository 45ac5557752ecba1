//! Observability infrastructure for the portal
//!
//! Provides:
//! - Prometheus metrics (lifecycle transitions, node collection latency and outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for remote collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PortalMetricsInner> = OnceLock::new();

struct PortalMetricsInner {
    lifecycle_transitions: IntCounterVec,
    node_collection_latency_seconds: Histogram,
    node_collections: IntCounterVec,
    fleet_nodes: IntGauge,
    active_allocations: IntGauge,
}

impl PortalMetricsInner {
    fn new() -> Self {
        Self {
            lifecycle_transitions: register_int_counter_vec!(
                "portal_lifecycle_transitions_total",
                "Request lifecycle operations by operation and outcome",
                &["operation", "outcome"]
            )
            .expect("Failed to register lifecycle_transitions"),

            node_collection_latency_seconds: register_histogram!(
                "portal_node_collection_latency_seconds",
                "Time spent collecting a snapshot or image listing from one node",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register node_collection_latency_seconds"),

            node_collections: register_int_counter_vec!(
                "portal_node_collections_total",
                "Per-node collections by kind and resulting status",
                &["kind", "status"]
            )
            .expect("Failed to register node_collections"),

            fleet_nodes: register_int_gauge!(
                "portal_fleet_nodes",
                "Number of nodes covered by the last fleet query"
            )
            .expect("Failed to register fleet_nodes"),

            active_allocations: register_int_gauge!(
                "portal_active_allocations",
                "Number of allocations currently granted"
            )
            .expect("Failed to register active_allocations"),
        }
    }
}

/// Portal metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PortalMetrics {
    _private: (),
}

impl Default for PortalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PortalMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PortalMetricsInner {
        GLOBAL_METRICS.get_or_init(PortalMetricsInner::new)
    }

    /// Count a lifecycle operation (`submit`, `approve`, ...) and its outcome
    pub fn record_transition(&self, operation: &str, outcome: &str) {
        self.inner()
            .lifecycle_transitions
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner()
            .node_collection_latency_seconds
            .observe(duration_secs);
    }

    /// Count a per-node collection (`snapshot` or `images`) by status
    pub fn record_node_collection(&self, kind: &str, status: &str) {
        self.inner()
            .node_collections
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn set_fleet_nodes(&self, count: i64) {
        self.inner().fleet_nodes.set(count);
    }

    pub fn set_active_allocations(&self, count: i64) {
        self.inner().active_allocations.set(count);
    }
}

/// Structured logger for portal events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_request_submitted(&self, request_id: &str, owner: &str, project: &str) {
        info!(
            event = "request_submitted",
            instance = %self.instance,
            request_id = %request_id,
            owner = %owner,
            project = %project,
            "Resource request submitted"
        );
    }

    pub fn log_request_approved(&self, request_id: &str, allocation_id: &str, namespace: &str) {
        info!(
            event = "request_approved",
            instance = %self.instance,
            request_id = %request_id,
            allocation_id = %allocation_id,
            namespace = %namespace,
            "Resource request approved"
        );
    }

    pub fn log_request_rejected(&self, request_id: &str, reason: Option<&str>) {
        info!(
            event = "request_rejected",
            instance = %self.instance,
            request_id = %request_id,
            reason = ?reason,
            "Resource request rejected"
        );
    }

    pub fn log_request_cancelled(&self, request_id: &str) {
        info!(
            event = "request_cancelled",
            instance = %self.instance,
            request_id = %request_id,
            "Resource request cancelled"
        );
    }

    pub fn log_request_deleted(&self, request_id: &str, had_allocation: bool) {
        info!(
            event = "request_deleted",
            instance = %self.instance,
            request_id = %request_id,
            had_allocation = had_allocation,
            "Resource request deleted"
        );
    }

    pub fn log_capacity_exceeded(
        &self,
        request_id: &str,
        dimension: &str,
        requested: f64,
        available: f64,
        shortfall: f64,
    ) {
        warn!(
            event = "capacity_exceeded",
            instance = %self.instance,
            request_id = %request_id,
            dimension = %dimension,
            requested = requested,
            available = available,
            shortfall = shortfall,
            "Approval refused, capacity exceeded"
        );
    }

    pub fn log_node_unreachable(&self, node_id: &str, kind: &str, error: &str) {
        warn!(
            event = "node_unreachable",
            instance = %self.instance,
            node_id = %node_id,
            kind = %kind,
            error = %error,
            "Node unreachable during collection"
        );
    }

    pub fn log_node_partial(&self, node_id: &str, failed_probes: &[&str]) {
        info!(
            event = "node_probe_partial",
            instance = %self.instance,
            node_id = %node_id,
            failed_probes = ?failed_probes,
            "Some probes failed on node"
        );
    }

    pub fn log_startup(&self, version: &str, nodes: usize) {
        info!(
            event = "portal_started",
            instance = %self.instance,
            version = %version,
            nodes = nodes,
            "Resource portal started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "portal_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Resource portal shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_metrics_creation() {
        let metrics = PortalMetrics::new();

        metrics.record_transition("submit", "ok");
        metrics.observe_collection_latency(0.2);
        metrics.record_node_collection("snapshot", "unreachable");
        metrics.set_fleet_nodes(3);
        metrics.set_active_allocations(1);

        // A second handle shares the registered metrics
        let again = PortalMetrics::new();
        again.record_transition("submit", "ok");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("portal-0");
        assert_eq!(logger.instance, "portal-0");
    }
}
