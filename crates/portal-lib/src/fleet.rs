//! Fleet-wide views composed from per-node collections
//!
//! Every fleet query fans out one task per node and waits for all of them.
//! Node failures stay in-band; the only hard errors are an empty node set
//! or a registry that cannot be listed.

use crate::capacity::{CapacitySource, NominalCapacity};
use crate::collector::NodeCollector;
use crate::error::{PortalError, Result};
use crate::health::HealthRegistry;
use crate::models::{
    FleetImage, FleetImages, NodeFailure, NodeImages, NodeProfile, NodeSnapshot, ResourceSnapshot,
    ResourceVector, SnapshotStatus,
};
use crate::observability::PortalMetrics;
use crate::registry::{require_node, NodeRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Totals across the reachable part of a fleet snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub nodes: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub total: ResourceVector,
    pub used: ResourceVector,
}

/// Sum observed capacity and usage over nodes that answered
pub fn fleet_summary(snapshots: &[NodeSnapshot]) -> FleetSummary {
    let reachable: Vec<&ResourceSnapshot> = snapshots
        .iter()
        .map(|s| &s.snapshot)
        .filter(|s| s.status != SnapshotStatus::Unreachable)
        .collect();

    let total = reachable
        .iter()
        .map(|s| s.observed_capacity())
        .fold(ResourceVector::default(), |acc, v| acc.add(&v));
    let used = reachable
        .iter()
        .map(|s| s.observed_usage())
        .fold(ResourceVector::default(), |acc, v| acc.add(&v));

    FleetSummary {
        nodes: snapshots.len(),
        reachable: reachable.len(),
        unreachable: snapshots.len() - reachable.len(),
        total,
        used,
    }
}

/// Merge per-node image listings into one inventory
///
/// Images are keyed by reference; the size is taken from the host with the
/// lowest node id. Entries are ordered by first host, then reference.
pub fn merge_images(listings: Vec<NodeImages>) -> FleetImages {
    let mut merged: BTreeMap<String, (u64, BTreeSet<String>)> = BTreeMap::new();
    let mut errors = Vec::new();

    let mut listings = listings;
    listings.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    for listing in listings {
        if let Some(error) = listing.error {
            errors.push(NodeFailure {
                node_id: listing.node_id,
                error,
            });
            continue;
        }
        for image in listing.images {
            merged
                .entry(image.reference)
                .or_insert_with(|| (image.size_bytes, BTreeSet::new()))
                .1
                .insert(image.node_id);
        }
    }

    let mut images: Vec<FleetImage> = merged
        .into_iter()
        .map(|(reference, (size_bytes, hosts))| FleetImage {
            reference,
            size_bytes,
            hosts: hosts.into_iter().collect(),
        })
        .collect();
    images.sort_by(|a, b| {
        a.hosts
            .first()
            .cmp(&b.hosts.first())
            .then_with(|| a.reference.cmp(&b.reference))
    });

    FleetImages { images, errors }
}

fn registry_error(err: PortalError) -> PortalError {
    match err {
        PortalError::Registry(_) => err,
        other => PortalError::Registry(other.to_string()),
    }
}

/// Sort by id and drop repeated ids so each node is queried once
fn distinct_nodes(mut nodes: Vec<NodeProfile>) -> Result<Vec<NodeProfile>> {
    if nodes.is_empty() {
        return Err(PortalError::NoNodes);
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes.dedup_by(|a, b| a.id == b.id);
    Ok(nodes)
}

pub struct FleetAggregator {
    registry: Arc<dyn NodeRegistry>,
    collector: Arc<NodeCollector>,
    health: Option<HealthRegistry>,
    metrics: PortalMetrics,
}

impl FleetAggregator {
    pub fn new(registry: Arc<dyn NodeRegistry>, collector: Arc<NodeCollector>) -> Self {
        Self {
            registry,
            collector,
            health: None,
            metrics: PortalMetrics::new(),
        }
    }

    /// Report fleet outcomes on the collector health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn registered_nodes(&self) -> Result<Vec<NodeProfile>> {
        self.registry.list_nodes().await.map_err(registry_error)
    }

    /// Profile of one registered node
    pub async fn node(&self, id: &str) -> Result<NodeProfile> {
        require_node(self.registry.as_ref(), id)
            .await
            .map_err(|e| match e {
                PortalError::NotFound { .. } => e,
                other => registry_error(other),
            })
    }

    /// Run `collect` for every node on its own task and wait for all
    ///
    /// A task that panics or is cancelled yields `on_failure(node, reason)`.
    async fn fan_out<T, F, Fut>(
        &self,
        nodes: &[NodeProfile],
        collect: F,
        on_failure: fn(&NodeProfile, String) -> T,
    ) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(Arc<NodeCollector>, NodeProfile) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handles = nodes
            .iter()
            .map(|node| tokio::spawn(collect(self.collector.clone(), node.clone())));
        let results = join_all(handles).await;

        nodes
            .iter()
            .zip(results)
            .map(|(node, result)| {
                result.unwrap_or_else(|e| {
                    error!(node_id = %node.id, error = %e, "Collection task failed");
                    on_failure(node, format!("collection task failed: {}", e))
                })
            })
            .collect()
    }

    /// Live snapshot of every given node, one entry per node sorted by id
    pub async fn snapshot_fleet(&self, nodes: Vec<NodeProfile>) -> Result<Vec<NodeSnapshot>> {
        let entries = self.collect_snapshots(nodes).await?;

        let unreachable = entries
            .iter()
            .filter(|e| e.snapshot.status == SnapshotStatus::Unreachable)
            .count();
        self.record_outcome(entries.len(), unreachable).await;

        Ok(entries)
    }

    /// Snapshot without touching the fleet gauge or collector health
    ///
    /// Used when only a subset of the fleet is queried.
    async fn collect_snapshots(&self, nodes: Vec<NodeProfile>) -> Result<Vec<NodeSnapshot>> {
        let nodes = distinct_nodes(nodes)?;
        debug!(nodes = nodes.len(), "Collecting fleet snapshot");

        let entries = self
            .fan_out(
                &nodes,
                |collector, node| async move {
                    let snapshot = collector.collect_snapshot(&node).await;
                    NodeSnapshot {
                        node_id: node.id,
                        node_name: node.name,
                        snapshot,
                    }
                },
                |node, reason| NodeSnapshot {
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    snapshot: ResourceSnapshot::unreachable(reason),
                },
            )
            .await;

        Ok(entries)
    }

    /// Deduplicated image inventory across the given nodes
    pub async fn images_fleet(&self, nodes: Vec<NodeProfile>) -> Result<FleetImages> {
        let nodes = distinct_nodes(nodes)?;
        debug!(nodes = nodes.len(), "Collecting fleet image inventory");

        let listings = self
            .fan_out(
                &nodes,
                |collector, node| async move { collector.collect_images(&node).await },
                |node, reason| NodeImages {
                    node_id: node.id.clone(),
                    images: Vec::new(),
                    error: Some(reason),
                },
            )
            .await;

        let inventory = merge_images(listings);
        self.record_outcome(nodes.len(), inventory.errors.len()).await;
        Ok(inventory)
    }

    pub async fn snapshot_registered(&self) -> Result<Vec<NodeSnapshot>> {
        let nodes = self.registered_nodes().await?;
        self.snapshot_fleet(nodes).await
    }

    pub async fn images_registered(&self) -> Result<FleetImages> {
        let nodes = self.registered_nodes().await?;
        self.images_fleet(nodes).await
    }

    async fn record_outcome(&self, total: usize, unreachable: usize) {
        self.metrics.set_fleet_nodes(total as i64);
        if let Some(health) = &self.health {
            health.record_fleet_outcome(total, unreachable).await;
        }
    }
}

/// Capacity from configured nominal figures, falling back to live totals
///
/// Registered nodes without a nominal figure are snapshotted and contribute
/// the capacity their probes observed; unreachable ones contribute nothing.
pub struct LiveCapacity {
    nominal: NominalCapacity,
    fleet: Arc<FleetAggregator>,
}

impl LiveCapacity {
    pub fn new(nominal: NominalCapacity, fleet: Arc<FleetAggregator>) -> Self {
        Self { nominal, fleet }
    }
}

#[async_trait]
impl CapacitySource for LiveCapacity {
    async fn total_capacity(&self) -> Result<ResourceVector> {
        let nodes = self.fleet.registered_nodes().await?;

        let mut total = ResourceVector::default();
        let mut unknown = Vec::new();
        for node in nodes {
            match self.nominal.get(&node.id) {
                Some(capacity) => total = total.add(capacity),
                None => unknown.push(node),
            }
        }

        if !unknown.is_empty() {
            let live = self.fleet.collect_snapshots(unknown).await?;
            total = total.add(&fleet_summary(&live).total);
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::{collector, node, Scripted, ScriptedSession};
    use crate::collector::CollectorConfig;
    use crate::error::ProbeError;
    use crate::health::{components, ComponentStatus};
    use crate::models::ImageRecord;
    use crate::registry::StaticNodeRegistry;
    use std::time::{Duration, Instant};

    fn aggregator(session: ScriptedSession, nodes: &[&str], timeout: Duration) -> FleetAggregator {
        let registry = StaticNodeRegistry::new(nodes.iter().map(|id| node(id)));
        FleetAggregator::new(
            Arc::new(registry),
            Arc::new(collector(Arc::new(session), timeout)),
        )
    }

    fn listing(node_id: &str, refs: &[(&str, u64)]) -> NodeImages {
        NodeImages {
            node_id: node_id.to_string(),
            images: refs
                .iter()
                .map(|(reference, size)| ImageRecord {
                    reference: reference.to_string(),
                    size_bytes: *size,
                    node_id: node_id.to_string(),
                })
                .collect(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_one_slow_node_yields_unreachable_entry() {
        let session = ScriptedSession::default()
            .with("node-a", Scripted::healthy())
            .with("node-b", Scripted::healthy().delayed(Duration::from_secs(30)))
            .with("node-c", Scripted::healthy());
        let health = HealthRegistry::new();
        let fleet = aggregator(
            session,
            &["node-c", "node-a", "node-b"],
            Duration::from_millis(200),
        )
        .with_health(health.clone());

        let started = Instant::now();
        let entries = fleet.snapshot_registered().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        let ids: Vec<&str> = entries.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(ids, vec!["node-a", "node-b", "node-c"]);
        assert_eq!(entries[0].snapshot.status, SnapshotStatus::Ok);
        assert_eq!(entries[1].snapshot.status, SnapshotStatus::Unreachable);
        assert!(entries[1].snapshot.cpu_utilization.is_none());
        assert_eq!(entries[2].snapshot.status, SnapshotStatus::Ok);

        let status = health.health().await.components[components::COLLECTOR].status;
        assert_eq!(status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_empty_node_set_is_an_error() {
        let fleet = aggregator(ScriptedSession::default(), &[], Duration::from_secs(1));
        assert!(matches!(
            fleet.snapshot_registered().await,
            Err(PortalError::NoNodes)
        ));
        assert!(matches!(
            fleet.images_fleet(Vec::new()).await,
            Err(PortalError::NoNodes)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_nodes_are_collected_once() {
        let fleet = aggregator(
            ScriptedSession::default().with("node-a", Scripted::healthy()),
            &["node-a"],
            Duration::from_secs(1),
        );
        let entries = fleet
            .snapshot_fleet(vec![node("node-a"), node("node-a")])
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_image_is_deduplicated() {
        let pytorch = "nvcr.io/nvidia/pytorch\t24.01-py3\tsha256:aa\t9.5GB\n";
        let session = ScriptedSession::default()
            .with(
                "node-b",
                Scripted::healthy().images(format!("{}redis\t7\tsha256:cc\t117MB\n", pytorch)),
            )
            .with("node-a", Scripted::healthy().images(pytorch))
            .with(
                "node-c",
                Scripted::healthy().failing(ProbeError::Unreachable("host down".into())),
            );
        let fleet = aggregator(session, &["node-a", "node-b", "node-c"], Duration::from_secs(1));

        let inventory = fleet.images_registered().await.unwrap();
        assert_eq!(inventory.images.len(), 2);
        assert_eq!(inventory.images[0].reference, "nvcr.io/nvidia/pytorch:24.01-py3");
        assert_eq!(inventory.images[0].hosts, vec!["node-a", "node-b"]);
        assert_eq!(inventory.images[1].reference, "redis:7");
        assert_eq!(inventory.images[1].hosts, vec!["node-b"]);

        assert_eq!(inventory.errors.len(), 1);
        assert_eq!(inventory.errors[0].node_id, "node-c");
    }

    #[test]
    fn test_merge_order_is_deterministic() {
        let a = merge_images(vec![
            listing("n2", &[("b:1", 1), ("a:1", 1)]),
            listing("n1", &[("z:1", 1)]),
        ]);
        let b = merge_images(vec![
            listing("n1", &[("z:1", 1)]),
            listing("n2", &[("a:1", 1), ("b:1", 1)]),
        ]);
        assert_eq!(a, b);

        let refs: Vec<&str> = a.images.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, vec!["z:1", "a:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_fleet_summary_skips_unreachable() {
        let session = ScriptedSession::default()
            .with("node-a", Scripted::healthy())
            .with("node-b", Scripted::healthy())
            .with(
                "node-c",
                Scripted::healthy().failing(ProbeError::Unreachable("refused".into())),
            );
        let fleet = aggregator(session, &["node-a", "node-b", "node-c"], Duration::from_secs(1));

        let summary = fleet_summary(&fleet.snapshot_registered().await.unwrap());
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.reachable, 2);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.total.cpu_cores, 64.0);
        assert_eq!(summary.total.gpu_count, 4.0);
        assert!((summary.used.cpu_cores - 32.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_capacity_prefers_nominal_figures() {
        let session = Arc::new(
            ScriptedSession::default()
                .with("nominal", Scripted::healthy())
                .with("probed", Scripted::healthy()),
        );
        let registry = StaticNodeRegistry::new(vec![node("nominal"), node("probed")]);
        let collector = NodeCollector::new(session.clone(), CollectorConfig::default());
        let health = HealthRegistry::new();
        health.register(components::COLLECTOR).await;
        let fleet = Arc::new(
            FleetAggregator::new(Arc::new(registry), Arc::new(collector))
                .with_health(health.clone()),
        );
        let nominal =
            NominalCapacity::new().with_node("nominal", ResourceVector::new(4.0, 32.0, 0.0, 0.0));

        let total = LiveCapacity::new(nominal, fleet).total_capacity().await.unwrap();
        assert_eq!(total.gpu_count, 6.0);
        assert_eq!(total.cpu_cores, 64.0);
        assert_eq!(session.calls("nominal"), 0);
        assert_eq!(session.calls("probed"), 1);
    }

    #[tokio::test]
    async fn test_live_capacity_leaves_fleet_health_alone() {
        let session = Arc::new(ScriptedSession::default().with("nominal", Scripted::healthy()));
        // "probed" has no script, so it fails as unreachable
        let registry = StaticNodeRegistry::new(vec![node("nominal"), node("probed")]);
        let collector = NodeCollector::new(session, CollectorConfig::default());
        let health = HealthRegistry::new();
        health.register(components::COLLECTOR).await;
        let fleet = Arc::new(
            FleetAggregator::new(Arc::new(registry), Arc::new(collector))
                .with_health(health.clone()),
        );
        let nominal =
            NominalCapacity::new().with_node("nominal", ResourceVector::new(4.0, 32.0, 0.0, 0.0));

        let total = LiveCapacity::new(nominal, fleet.clone())
            .total_capacity()
            .await
            .unwrap();
        assert_eq!(total.gpu_count, 4.0);

        let report = health.health().await;
        assert_eq!(report.components[components::COLLECTOR].status, ComponentStatus::Healthy);
        assert!(report.components[components::COLLECTOR].message.is_none());

        // A full fleet query still reports the down node
        fleet.snapshot_registered().await.unwrap();
        let report = health.health().await;
        assert_eq!(report.components[components::COLLECTOR].status, ComponentStatus::Degraded);
    }
}
