//! Portal server configuration

use anyhow::{Context, Result};
use portal_lib::{NodeProfile, NominalCapacity, ResourceVector, DEFAULT_RUNTIME};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "PORTAL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "portal.toml";

/// A compute node entry in the configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Nominal capacity; nodes without one are sized from live probes
    #[serde(default)]
    pub capacity: Option<NodeCapacity>,
}

/// Nominal node capacity as written in the configuration file
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NodeCapacity {
    #[serde(default)]
    pub gpu_count: f64,
    #[serde(default)]
    pub cpu_cores: f64,
    #[serde(default)]
    pub memory_gb: f64,
    #[serde(default)]
    pub storage_tb: f64,
}

impl From<NodeCapacity> for ResourceVector {
    fn from(c: NodeCapacity) -> Self {
        ResourceVector::new(c.gpu_count, c.cpu_cores, c.memory_gb, c.storage_tb)
    }
}

impl NodeConfig {
    pub fn profile(&self) -> NodeProfile {
        NodeProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            ssh_user: self.ssh_user.clone(),
            ssh_port: self.ssh_port,
        }
    }
}

/// Portal server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    /// Port for the HTTP API, health and metrics
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// JSON file requests and allocations are persisted to
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Cluster target recorded on allocations
    #[serde(default = "default_cluster_target")]
    pub cluster_target: String,

    /// Upper bound on one node's collection in seconds
    #[serde(default = "default_collection_timeout")]
    pub collection_timeout_secs: u64,

    #[serde(default = "default_ssh_connect_timeout")]
    pub ssh_connect_timeout_secs: u64,

    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn default_listen_port() -> u16 {
    8080
}

fn default_cluster_target() -> String {
    DEFAULT_RUNTIME.to_string()
}

fn default_collection_timeout() -> u64 {
    10
}

fn default_ssh_connect_timeout() -> u64 {
    5
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            store_path: None,
            cluster_target: default_cluster_target(),
            collection_timeout_secs: default_collection_timeout(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout(),
            ssh_binary: default_ssh_binary(),
            nodes: Vec::new(),
        }
    }
}

impl PortalConfig {
    /// Load from the config file named by `PORTAL_CONFIG` and the environment
    ///
    /// The file is optional. Environment variables use the `PORTAL_` prefix
    /// with `__` separating nested keys, e.g. `PORTAL_LISTEN_PORT=9000`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("PORTAL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let config: PortalConfig = config
            .try_deserialize()
            .context("Invalid portal configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                anyhow::bail!("Node entry with empty id");
            }
            if !seen.insert(node.id.as_str()) {
                anyhow::bail!("Duplicate node id '{}'", node.id);
            }
            let destination = [("ssh_user", &node.ssh_user), ("ip_address", &node.ip_address)];
            for (field, value) in destination {
                if value.trim().is_empty() || value.starts_with('-') {
                    anyhow::bail!("Node '{}' has invalid {} '{}'", node.id, field, value);
                }
            }
        }
        if self.collection_timeout_secs == 0 {
            anyhow::bail!("collection_timeout_secs must be at least 1");
        }
        if self.ssh_connect_timeout_secs == 0 {
            anyhow::bail!("ssh_connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn node_profiles(&self) -> Vec<NodeProfile> {
        self.nodes.iter().map(NodeConfig::profile).collect()
    }

    pub fn nominal_capacity(&self) -> NominalCapacity {
        let mut nominal = NominalCapacity::new();
        for node in &self.nodes {
            if let Some(capacity) = node.capacity {
                nominal.insert(node.id.clone(), capacity.into());
            }
        }
        nominal
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_secs(self.collection_timeout_secs)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }
}
