//! Error taxonomy for the allocation core

use crate::models::{Dimension, RequestState};
use thiserror::Error;

/// Errors returned by lifecycle, ledger and fleet operations
#[derive(Debug, Error)]
pub enum PortalError {
    /// Malformed or missing input field
    #[error("invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// Referenced entity does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Operation not legal in the entity's current state
    #[error("request '{id}' is {state}, operation requires pending")]
    InvalidState { id: String, state: RequestState },

    /// Approval would overcommit a capacity dimension
    #[error(
        "insufficient {dimension} capacity: requested {requested}, available {available}, short by {shortfall}"
    )]
    CapacityExceeded {
        dimension: Dimension,
        requested: f64,
        available: f64,
        shortfall: f64,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The node registry could not be consulted
    #[error("node registry unavailable: {0}")]
    Registry(String),

    /// A fleet query was issued with no registered nodes
    #[error("no nodes registered")]
    NoNodes,
}

impl PortalError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PortalError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn request_not_found(id: impl Into<String>) -> Self {
        PortalError::NotFound {
            kind: "request",
            id: id.into(),
        }
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            PortalError::Validation { .. } => "validation_error",
            PortalError::NotFound { .. } => "not_found",
            PortalError::InvalidState { .. } => "invalid_state",
            PortalError::CapacityExceeded { .. } => "capacity_exceeded",
            PortalError::Store(_) => "store_error",
            PortalError::Registry(_) => "registry_unavailable",
            PortalError::NoNodes => "no_nodes",
        }
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize store contents: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("duplicate {kind} id '{id}'")]
    Duplicate { kind: &'static str, id: String },
}

/// Per-node probe failure; never propagated past the collector
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// Collection exceeded its bound, in milliseconds
    #[error("probe timed out after {0}ms")]
    Timeout(u64),

    #[error("remote command failed: {0}")]
    CommandFailed(String),
}

pub type Result<T, E = PortalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_names_dimension_and_shortfall() {
        let err = PortalError::CapacityExceeded {
            dimension: Dimension::Gpu,
            requested: 1.0,
            available: 0.0,
            shortfall: 1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("gpu"));
        assert!(msg.contains("short by 1"));
        assert_eq!(err.code(), "capacity_exceeded");
    }

    #[test]
    fn test_invalid_state_names_current_state() {
        let err = PortalError::InvalidState {
            id: "abc".to_string(),
            state: RequestState::Approved,
        };
        assert!(err.to_string().contains("approved"));
    }
}
