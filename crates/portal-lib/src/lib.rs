//! Core library for the HPC resource portal
//!
//! This crate provides:
//! - The resource request lifecycle and its capacity ledger
//! - Request and allocation storage
//! - Per-node resource and image collection over remote sessions
//! - Fleet-wide aggregation of node collections
//! - Health checks and observability

pub mod capacity;
pub mod collector;
pub mod error;
pub mod fleet;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod registry;
pub mod store;
pub mod submission;

pub use capacity::{CapacityLedger, CapacityReport, CapacitySource, NominalCapacity};
pub use collector::{CollectorConfig, NodeCollector, RemoteSession, SshSession};
pub use error::{PortalError, ProbeError, Result, StoreError};
pub use fleet::{fleet_summary, FleetAggregator, FleetSummary, LiveCapacity};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{LifecycleManager, RequestFilter};
pub use models::*;
pub use observability::{PortalMetrics, StructuredLogger};
pub use registry::{NodeRegistry, StaticNodeRegistry};
pub use store::{MemoryStore, Store};
pub use submission::SubmitRequest;
