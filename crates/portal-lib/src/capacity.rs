//! Capacity accounting
//!
//! The ledger is a pure function over the fleet's total capacity and the
//! set of granted allocations. It owns no state; callers serialize the
//! check-and-commit step themselves.

use crate::error::{PortalError, Result};
use crate::models::{Allocation, Dimension, ResourceVector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Absorbs floating point accumulation when summing fractional grants
const EPSILON: f64 = 1e-9;

/// A dimension that would be (or already is) overcommitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortfall {
    pub dimension: Dimension,
    pub requested: f64,
    pub available: f64,
    pub shortfall: f64,
}

impl From<Shortfall> for PortalError {
    fn from(s: Shortfall) -> Self {
        PortalError::CapacityExceeded {
            dimension: s.dimension,
            requested: s.requested,
            available: s.available,
            shortfall: s.shortfall,
        }
    }
}

/// Summary of total, granted and remaining capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub total: ResourceVector,
    pub granted: ResourceVector,
    pub available: ResourceVector,
    pub over_committed: Vec<Dimension>,
    pub active_allocations: usize,
}

/// Capacity computations over (total, allocations)
pub struct CapacityLedger;

impl CapacityLedger {
    /// Sum of granted vectors across allocations
    pub fn granted(allocations: &[Allocation]) -> ResourceVector {
        allocations.iter().map(|a| &a.granted).sum()
    }

    /// Total minus granted, clamped at zero per dimension
    pub fn available_capacity(total: &ResourceVector, allocations: &[Allocation]) -> ResourceVector {
        total.saturating_sub(&Self::granted(allocations))
    }

    /// Dimensions whose grants already exceed total capacity
    ///
    /// Happens when capacity shrinks after approvals were made.
    pub fn over_committed(total: &ResourceVector, allocations: &[Allocation]) -> Vec<Dimension> {
        let granted = Self::granted(allocations);
        Dimension::ALL
            .into_iter()
            .filter(|d| granted.get(*d) > total.get(*d) + EPSILON)
            .collect()
    }

    /// First dimension (gpu, cpu, memory, storage) the candidate would overcommit
    pub fn would_exceed(
        total: &ResourceVector,
        allocations: &[Allocation],
        candidate: &ResourceVector,
    ) -> Option<Shortfall> {
        let granted = Self::granted(allocations);

        Dimension::ALL.into_iter().find_map(|dim| {
            let requested = candidate.get(dim);
            let after = granted.get(dim) + requested;
            let cap = total.get(dim);

            if after > cap + EPSILON {
                Some(Shortfall {
                    dimension: dim,
                    requested,
                    available: (cap - granted.get(dim)).max(0.0),
                    shortfall: after - cap,
                })
            } else {
                None
            }
        })
    }

    pub fn report(total: &ResourceVector, allocations: &[Allocation]) -> CapacityReport {
        CapacityReport {
            total: *total,
            granted: Self::granted(allocations),
            available: Self::available_capacity(total, allocations),
            over_committed: Self::over_committed(total, allocations),
            active_allocations: allocations.len(),
        }
    }
}

/// Supplies the fleet's total capacity for approval checks
#[async_trait]
pub trait CapacitySource: Send + Sync {
    async fn total_capacity(&self) -> Result<ResourceVector>;
}

/// Externally configured nominal capacity, per node
#[derive(Debug, Clone, Default)]
pub struct NominalCapacity {
    per_node: HashMap<String, ResourceVector>,
}

impl NominalCapacity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node_id: impl Into<String>, capacity: ResourceVector) -> Self {
        self.per_node.insert(node_id.into(), capacity);
        self
    }

    pub fn insert(&mut self, node_id: impl Into<String>, capacity: ResourceVector) {
        self.per_node.insert(node_id.into(), capacity);
    }

    pub fn get(&self, node_id: &str) -> Option<&ResourceVector> {
        self.per_node.get(node_id)
    }

    pub fn total(&self) -> ResourceVector {
        self.per_node.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_node.is_empty()
    }
}

#[async_trait]
impl CapacitySource for NominalCapacity {
    async fn total_capacity(&self) -> Result<ResourceVector> {
        Ok(self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn allocation(granted: ResourceVector) -> Allocation {
        Allocation {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            namespace: "test".to_string(),
            granted,
            cluster_target: "kubernetes".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_capacity() {
        let total = ResourceVector::new(4.0, 32.0, 256.0, 10.0);
        let allocs = vec![
            allocation(ResourceVector::new(2.0, 8.0, 64.0, 1.0)),
            allocation(ResourceVector::new(1.0, 4.0, 32.0, 0.5)),
        ];

        let available = CapacityLedger::available_capacity(&total, &allocs);
        assert_eq!(available, ResourceVector::new(1.0, 20.0, 160.0, 8.5));
    }

    #[test]
    fn test_would_exceed_reports_first_dimension_in_order() {
        let total = ResourceVector::new(4.0, 32.0, 256.0, 10.0);
        let allocs = vec![allocation(ResourceVector::new(4.0, 32.0, 0.0, 0.0))];

        // Both gpu and cpu overflow; gpu is checked first
        let shortfall = CapacityLedger::would_exceed(
            &total,
            &allocs,
            &ResourceVector::new(1.0, 2.0, 0.0, 0.0),
        )
        .unwrap();
        assert_eq!(shortfall.dimension, Dimension::Gpu);
        assert_eq!(shortfall.shortfall, 1.0);
        assert_eq!(shortfall.available, 0.0);
    }

    #[test]
    fn test_dimensions_are_independent() {
        let total = ResourceVector::new(4.0, 32.0, 256.0, 10.0);
        let allocs = vec![allocation(ResourceVector::new(4.0, 0.0, 0.0, 0.0))];

        // GPUs are exhausted but a CPU-only request still fits
        assert!(CapacityLedger::would_exceed(
            &total,
            &allocs,
            &ResourceVector::new(0.0, 16.0, 64.0, 1.0)
        )
        .is_none());

        let shortfall = CapacityLedger::would_exceed(
            &total,
            &allocs,
            &ResourceVector::new(0.0, 0.0, 300.0, 0.0),
        )
        .unwrap();
        assert_eq!(shortfall.dimension, Dimension::Memory);
        assert_eq!(shortfall.shortfall, 44.0);
    }

    #[test]
    fn test_exact_fit_is_allowed() {
        let total = ResourceVector::new(0.0, 1.0, 0.0, 0.0);
        let allocs = vec![
            allocation(ResourceVector::new(0.0, 0.1, 0.0, 0.0)),
            allocation(ResourceVector::new(0.0, 0.2, 0.0, 0.0)),
        ];

        assert!(CapacityLedger::would_exceed(
            &total,
            &allocs,
            &ResourceVector::new(0.0, 0.7, 0.0, 0.0)
        )
        .is_none());
    }

    #[test]
    fn test_over_committed_after_capacity_shrinks() {
        let total = ResourceVector::new(2.0, 32.0, 256.0, 10.0);
        let allocs = vec![allocation(ResourceVector::new(4.0, 8.0, 0.0, 0.0))];

        let report = CapacityLedger::report(&total, &allocs);
        assert_eq!(report.over_committed, vec![Dimension::Gpu]);
        assert_eq!(report.available.gpu_count, 0.0);
        assert_eq!(report.active_allocations, 1);
    }

    #[tokio::test]
    async fn test_nominal_capacity_sums_nodes() {
        let nominal = NominalCapacity::new()
            .with_node("a", ResourceVector::new(4.0, 32.0, 0.0, 0.0))
            .with_node("b", ResourceVector::new(0.0, 64.0, 512.0, 2.0));

        let total = nominal.total_capacity().await.unwrap();
        assert_eq!(total, ResourceVector::new(4.0, 96.0, 512.0, 2.0));
    }
}
