//! Per-node resource and image collection
//!
//! Probes run on the node through a [`RemoteSession`]. A failing node never
//! produces an error here: the outcome is carried in-band as an unreachable
//! or partial snapshot, or as an image listing with an error attached.
//! Concurrent requests for the same node and kind share one collection.

mod inflight;
pub mod probes;
mod ssh;


pub use inflight::Inflight;
pub use ssh::SshSession;

use crate::error::ProbeError;
use crate::models::{NodeImages, NodeProfile, ResourceSnapshot, SnapshotStatus};
use crate::observability::{PortalMetrics, StructuredLogger};
use async_trait::async_trait;
use futures::future::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const KIND_SNAPSHOT: &str = "snapshot";
pub const KIND_IMAGES: &str = "images";

/// Executes a shell script on a node and returns its stdout
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, node: &NodeProfile, script: &str) -> Result<String, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Upper bound on one node's collection, connection included
    pub timeout: Duration,
    pub instance: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            instance: "portal".to_string(),
        }
    }
}

struct CollectorShared {
    session: Arc<dyn RemoteSession>,
    timeout: Duration,
    metrics: PortalMetrics,
    logger: StructuredLogger,
}

pub struct NodeCollector {
    shared: Arc<CollectorShared>,
    snapshots: Inflight<ResourceSnapshot>,
    images: Inflight<NodeImages>,
}

impl NodeCollector {
    pub fn new(session: Arc<dyn RemoteSession>, config: CollectorConfig) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                session,
                timeout: config.timeout,
                metrics: PortalMetrics::new(),
                logger: StructuredLogger::new(config.instance),
            }),
            snapshots: Inflight::new(),
            images: Inflight::new(),
        }
    }

    /// Collect a resource snapshot from one node
    pub async fn collect_snapshot(&self, node: &NodeProfile) -> ResourceSnapshot {
        let shared = self.shared.clone();
        let node = node.clone();
        let key = node.id.clone();
        self.snapshots
            .run(&key, move || {
                async move { shared.snapshot(&node).await }.boxed()
            })
            .await
    }

    /// Collect the container image listing from one node
    pub async fn collect_images(&self, node: &NodeProfile) -> NodeImages {
        let shared = self.shared.clone();
        let node = node.clone();
        let key = node.id.clone();
        self.images
            .run(&key, move || {
                async move { shared.images(&node).await }.boxed()
            })
            .await
    }
}

impl CollectorShared {
    async fn run_bounded(&self, node: &NodeProfile, script: &str) -> Result<String, ProbeError> {
        match tokio::time::timeout(self.timeout, self.session.run(node, script)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    async fn snapshot(&self, node: &NodeProfile) -> ResourceSnapshot {
        let start = Instant::now();
        let result = self.run_bounded(node, probes::SNAPSHOT_SCRIPT).await;
        self.metrics
            .observe_collection_latency(start.elapsed().as_secs_f64());

        let snapshot = match result {
            Ok(output) => {
                let (snapshot, failed) = probes::parse_snapshot(&output);
                if !failed.is_empty() {
                    self.logger.log_node_partial(&node.id, &failed);
                }
                snapshot
            }
            // The node answered but the script did not run to completion
            Err(ProbeError::CommandFailed(message)) => {
                let mut snapshot = ResourceSnapshot::unreachable(
                    ProbeError::CommandFailed(message).to_string(),
                );
                snapshot.status = SnapshotStatus::Partial;
                self.logger.log_node_partial(
                    &node.id,
                    &[
                        probes::SECTION_CPU,
                        probes::SECTION_MEMORY,
                        probes::SECTION_STORAGE,
                        probes::SECTION_GPU,
                    ],
                );
                snapshot
            }
            Err(e) => {
                let message = e.to_string();
                self.logger
                    .log_node_unreachable(&node.id, KIND_SNAPSHOT, &message);
                ResourceSnapshot::unreachable(message)
            }
        };

        self.metrics
            .record_node_collection(KIND_SNAPSHOT, snapshot.status.as_str());
        snapshot
    }

    async fn images(&self, node: &NodeProfile) -> NodeImages {
        let start = Instant::now();
        let result = self.run_bounded(node, probes::IMAGES_SCRIPT).await;
        self.metrics
            .observe_collection_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                self.metrics.record_node_collection(KIND_IMAGES, "ok");
                NodeImages {
                    node_id: node.id.clone(),
                    images: probes::parse_images(&output, &node.id),
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let status = match e {
                    ProbeError::CommandFailed(_) => SnapshotStatus::Partial,
                    _ => SnapshotStatus::Unreachable,
                };
                self.metrics
                    .record_node_collection(KIND_IMAGES, status.as_str());
                self.logger
                    .log_node_unreachable(&node.id, KIND_IMAGES, &message);
                NodeImages {
                    node_id: node.id.clone(),
                    images: Vec::new(),
                    error: Some(message),
                }
            }
        }
    }
}
