//! Node registry contract
//!
//! Registration bookkeeping lives outside the portal core; the core only
//! needs to enumerate nodes and resolve an id to a connection profile.

use crate::error::{PortalError, Result};
use crate::models::NodeProfile;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// All registered nodes, sorted by id
    async fn list_nodes(&self) -> Result<Vec<NodeProfile>>;

    async fn get_node(&self, id: &str) -> Result<Option<NodeProfile>>;
}

/// Registry backed by a fixed list, typically loaded from configuration
pub struct StaticNodeRegistry {
    nodes: DashMap<String, NodeProfile>,
}

impl StaticNodeRegistry {
    pub fn new(nodes: impl IntoIterator<Item = NodeProfile>) -> Self {
        let map = DashMap::new();
        for node in nodes {
            debug!(node_id = %node.id, address = %node.ip_address, "Registering node");
            map.insert(node.id.clone(), node);
        }
        Self { nodes: map }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl NodeRegistry for StaticNodeRegistry {
    async fn list_nodes(&self) -> Result<Vec<NodeProfile>> {
        let mut nodes: Vec<NodeProfile> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeProfile>> {
        Ok(self.nodes.get(id).map(|r| r.clone()))
    }
}

/// Resolve a node id or fail with `NotFound`
pub async fn require_node(registry: &dyn NodeRegistry, id: &str) -> Result<NodeProfile> {
    registry
        .get_node(id)
        .await?
        .ok_or_else(|| PortalError::NotFound {
            kind: "node",
            id: id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeProfile {
        NodeProfile {
            id: id.to_string(),
            name: format!("{}.cluster", id),
            ip_address: "10.0.0.1".to_string(),
            ssh_user: "hpc".to_string(),
            ssh_port: 22,
        }
    }

    #[tokio::test]
    async fn test_list_nodes_sorted_by_id() {
        let registry = StaticNodeRegistry::new(vec![node("gpu-2"), node("cpu-1"), node("gpu-1")]);
        let ids: Vec<String> = registry
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["cpu-1", "gpu-1", "gpu-2"]);
    }

    #[tokio::test]
    async fn test_require_node() {
        let registry = StaticNodeRegistry::new(vec![node("a")]);
        assert_eq!(require_node(&registry, "a").await.unwrap().name, "a.cluster");
        assert!(matches!(
            require_node(&registry, "b").await,
            Err(PortalError::NotFound { kind: "node", .. })
        ));
    }
}
