//! Core data models for the resource portal

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default runtime for requests that do not name one
pub const DEFAULT_RUNTIME: &str = "kubernetes";

/// One of the four independently tracked capacity dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Gpu,
    Cpu,
    Memory,
    Storage,
}

impl Dimension {
    /// Fixed check order used when reporting the first violated dimension
    pub const ALL: [Dimension; 4] = [
        Dimension::Gpu,
        Dimension::Cpu,
        Dimension::Memory,
        Dimension::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Gpu => "gpu",
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Storage => "storage",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement vector: GPUs, CPU cores, memory in GB, storage in TB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceVector {
    pub gpu_count: f64,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    pub storage_tb: f64,
}

impl ResourceVector {
    pub fn new(gpu_count: f64, cpu_cores: f64, memory_gb: f64, storage_tb: f64) -> Self {
        Self {
            gpu_count,
            cpu_cores,
            memory_gb,
            storage_tb,
        }
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Gpu => self.gpu_count,
            Dimension::Cpu => self.cpu_cores,
            Dimension::Memory => self.memory_gb,
            Dimension::Storage => self.storage_tb,
        }
    }

    fn get_mut(&mut self, dimension: Dimension) -> &mut f64 {
        match dimension {
            Dimension::Gpu => &mut self.gpu_count,
            Dimension::Cpu => &mut self.cpu_cores,
            Dimension::Memory => &mut self.memory_gb,
            Dimension::Storage => &mut self.storage_tb,
        }
    }

    pub fn set(&mut self, dimension: Dimension, value: f64) {
        *self.get_mut(dimension) = value;
    }

    /// Component-wise sum
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = *self;
        for dim in Dimension::ALL {
            out.set(dim, self.get(dim) + other.get(dim));
        }
        out
    }

    /// Component-wise difference, clamped at zero
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = *self;
        for dim in Dimension::ALL {
            out.set(dim, (self.get(dim) - other.get(dim)).max(0.0));
        }
        out
    }
}

impl<'a> std::iter::Sum<&'a ResourceVector> for ResourceVector {
    fn sum<I: Iterator<Item = &'a ResourceVector>>(iter: I) -> Self {
        iter.fold(ResourceVector::default(), |acc, v| acc.add(v))
    }
}

/// Lifecycle state of a resource request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }

    /// Terminal states only leave by deletion
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(RequestState::Pending),
            "approved" => Ok(RequestState::Approved),
            "rejected" => Ok(RequestState::Rejected),
            "cancelled" => Ok(RequestState::Cancelled),
            other => Err(format!("unknown request state '{}'", other)),
        }
    }
}

/// A researcher's request for compute resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub id: String,
    pub project_name: String,
    pub owner: String,
    pub organisation: String,
    pub summary: String,
    pub preferred_runtime: String,
    pub preferred_image: Option<String>,
    pub tags: Vec<String>,
    pub deadline: Option<NaiveDate>,
    pub requirements: ResourceVector,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Granted, capacity-checked commitment produced by approving a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: String,
    pub request_id: String,
    pub namespace: String,
    pub granted: ResourceVector,
    pub cluster_target: String,
    pub created_at: DateTime<Utc>,
}

/// Connection profile of a registered compute node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProfile {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub ssh_user: String,
    pub ssh_port: u16,
}

/// Outcome of a per-node collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Ok,
    Partial,
    Unreachable,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Ok => "ok",
            SnapshotStatus::Partial => "partial",
            SnapshotStatus::Unreachable => "unreachable",
        }
    }
}

/// Point-in-time resource reading for one node
///
/// Utilization fields are percentages. Any field the probes could not
/// collect is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub cpu_utilization: Option<f64>,
    pub memory_utilization: Option<f64>,
    pub storage_utilization: Option<f64>,
    pub gpu_utilization: Option<f64>,
    pub cpu_cores: Option<f64>,
    pub memory_total_gb: Option<f64>,
    pub storage_total_tb: Option<f64>,
    pub gpu_count: Option<f64>,
    pub collected_at: DateTime<Utc>,
    pub status: SnapshotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceSnapshot {
    /// Snapshot for a node that could not be reached
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            cpu_utilization: None,
            memory_utilization: None,
            storage_utilization: None,
            gpu_utilization: None,
            cpu_cores: None,
            memory_total_gb: None,
            storage_total_tb: None,
            gpu_count: None,
            collected_at: Utc::now(),
            status: SnapshotStatus::Unreachable,
            error: Some(error.into()),
        }
    }

    /// Capacity totals observed by the probes, zero where unknown
    pub fn observed_capacity(&self) -> ResourceVector {
        ResourceVector {
            gpu_count: self.gpu_count.unwrap_or(0.0),
            cpu_cores: self.cpu_cores.unwrap_or(0.0),
            memory_gb: self.memory_total_gb.unwrap_or(0.0),
            storage_tb: self.storage_total_tb.unwrap_or(0.0),
        }
    }

    /// Amounts in use, derived from totals and utilization
    pub fn observed_usage(&self) -> ResourceVector {
        fn used(total: Option<f64>, pct: Option<f64>) -> f64 {
            match (total, pct) {
                (Some(t), Some(p)) => t * p / 100.0,
                _ => 0.0,
            }
        }

        ResourceVector {
            gpu_count: used(self.gpu_count, self.gpu_utilization),
            cpu_cores: used(self.cpu_cores, self.cpu_utilization),
            memory_gb: used(self.memory_total_gb, self.memory_utilization),
            storage_tb: used(self.storage_total_tb, self.storage_utilization),
        }
    }
}

/// A fleet snapshot entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: String,
    pub node_name: String,
    pub snapshot: ResourceSnapshot,
}

/// A container image observed on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub reference: String,
    pub size_bytes: u64,
    pub node_id: String,
}

/// Image listing for one node, with the in-band error if the listing failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeImages {
    pub node_id: String,
    pub images: Vec<ImageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A deduplicated image with every node hosting it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetImage {
    pub reference: String,
    pub size_bytes: u64,
    pub hosts: Vec<String>,
}

/// Per-node failure surfaced in-band by fleet queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
    pub node_id: String,
    pub error: String,
}

/// Fleet-wide image inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetImages {
    pub images: Vec<FleetImage>,
    pub errors: Vec<NodeFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_arithmetic() {
        let a = ResourceVector::new(4.0, 32.0, 128.0, 1.0);
        let b = ResourceVector::new(1.0, 8.0, 200.0, 0.5);

        assert_eq!(a.add(&b), ResourceVector::new(5.0, 40.0, 328.0, 1.5));
        assert_eq!(a.saturating_sub(&b), ResourceVector::new(3.0, 24.0, 0.0, 0.5));

        let total: ResourceVector = [a, b].iter().sum();
        assert_eq!(total, a.add(&b));
    }

    #[test]
    fn test_request_state_terminal() {
        assert!(!RequestState::Pending.is_terminal());
        assert!(RequestState::Approved.is_terminal());
        assert!(RequestState::Rejected.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
        assert_eq!("Approved".parse::<RequestState>(), Ok(RequestState::Approved));
        assert!("done".parse::<RequestState>().is_err());
    }

    #[test]
    fn test_vector_serializes_camel_case() {
        let json = serde_json::to_value(ResourceVector::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(json["gpuCount"], 1.0);
        assert_eq!(json["cpuCores"], 2.0);
        assert_eq!(json["memoryGb"], 3.0);
        assert_eq!(json["storageTb"], 4.0);
    }

    #[test]
    fn test_snapshot_observed_usage() {
        let mut snapshot = ResourceSnapshot::unreachable("down");
        snapshot.cpu_cores = Some(32.0);
        snapshot.cpu_utilization = Some(50.0);
        snapshot.gpu_count = Some(4.0);

        let usage = snapshot.observed_usage();
        assert_eq!(usage.cpu_cores, 16.0);
        // No utilization reading for GPUs
        assert_eq!(usage.gpu_count, 0.0);
        assert_eq!(snapshot.observed_capacity().gpu_count, 4.0);
    }
}
