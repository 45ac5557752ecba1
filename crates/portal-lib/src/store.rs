//! Persistence for requests and allocations
//!
//! The store keeps both collections in insertion order. When a
//! persistence path is configured, every mutation is written to disk
//! atomically (temp file + rename) and the file is reloaded on open.
//! A mutation that cannot be written leaves the in-memory state untouched.

use crate::error::StoreError;
use crate::models::{Allocation, ResourceRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// CRUD contract over requests and allocations
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_request(&self, request: ResourceRequest) -> Result<(), StoreError>;

    async fn get_request(&self, id: &str) -> Result<Option<ResourceRequest>, StoreError>;

    /// Replace an existing request; returns false if it does not exist
    async fn update_request(&self, request: ResourceRequest) -> Result<bool, StoreError>;

    /// Remove a request and its allocation; returns false if absent
    async fn delete_request(&self, id: &str) -> Result<bool, StoreError>;

    /// All requests in insertion order
    async fn list_requests(&self) -> Result<Vec<ResourceRequest>, StoreError>;

    async fn insert_allocation(&self, allocation: Allocation) -> Result<(), StoreError>;

    async fn allocation_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Allocation>, StoreError>;

    async fn delete_allocation_for_request(&self, request_id: &str) -> Result<bool, StoreError>;

    /// All allocations in insertion order
    async fn list_allocations(&self) -> Result<Vec<Allocation>, StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    requests: Vec<ResourceRequest>,
    allocations: Vec<Allocation>,
}

/// In-memory store with optional JSON file persistence
pub struct MemoryStore {
    state: RwLock<StoreState>,
    persistence_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence_path: None,
        }
    }

    /// Open a store backed by a JSON file, loading existing contents
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let state = load_from_disk(&path)?;
            info!(
                path = %path.display(),
                requests = state.requests.len(),
                allocations = state.allocations.len(),
                "Loaded store from disk"
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            persistence_path: Some(path),
        })
    }

    /// Apply `change`, keeping it only once it is on disk
    fn commit<T>(
        &self,
        state: &mut StoreState,
        change: impl FnOnce(&mut StoreState) -> T,
    ) -> Result<T, StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(change(state));
        };

        let mut next = state.clone();
        let out = change(&mut next);
        save_to_disk(path, &next)?;
        debug!(path = %path.display(), "Store flushed to disk");
        *state = next;
        Ok(out)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn save_to_disk(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let json = serde_json::to_vec_pretty(state)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(io_err(&temp_path))?;
    file.write_all(&json).map_err(io_err(&temp_path))?;
    file.sync_all().map_err(io_err(&temp_path))?;

    std::fs::rename(&temp_path, path).map_err(io_err(path))?;
    Ok(())
}

fn load_from_disk(path: &Path) -> Result<StoreState, StoreError> {
    let data = std::fs::read(path).map_err(io_err(path))?;
    Ok(serde_json::from_slice(&data)?)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_request(&self, request: ResourceRequest) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.requests.iter().any(|r| r.id == request.id) {
            return Err(StoreError::Duplicate {
                kind: "request",
                id: request.id,
            });
        }
        self.commit(&mut state, |s| s.requests.push(request))
    }

    async fn get_request(&self, id: &str) -> Result<Option<ResourceRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn update_request(&self, request: ResourceRequest) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(index) = state.requests.iter().position(|r| r.id == request.id) else {
            return Ok(false);
        };
        self.commit(&mut state, |s| s.requests[index] = request)?;
        Ok(true)
    }

    async fn delete_request(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let present = state.requests.iter().any(|r| r.id == id)
            || state.allocations.iter().any(|a| a.request_id == id);
        if !present {
            return Ok(false);
        }

        self.commit(&mut state, |s| {
            let before = s.requests.len();
            s.requests.retain(|r| r.id != id);
            // Cascade so no allocation outlives its request
            s.allocations.retain(|a| a.request_id != id);
            s.requests.len() != before
        })
    }

    async fn list_requests(&self) -> Result<Vec<ResourceRequest>, StoreError> {
        Ok(self.state.read().await.requests.clone())
    }

    async fn insert_allocation(&self, allocation: Allocation) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state
            .allocations
            .iter()
            .any(|a| a.id == allocation.id || a.request_id == allocation.request_id)
        {
            return Err(StoreError::Duplicate {
                kind: "allocation",
                id: allocation.id,
            });
        }
        self.commit(&mut state, |s| s.allocations.push(allocation))
    }

    async fn allocation_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Allocation>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .allocations
            .iter()
            .find(|a| a.request_id == request_id)
            .cloned())
    }

    async fn delete_allocation_for_request(&self, request_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.allocations.iter().any(|a| a.request_id == request_id) {
            return Ok(false);
        }
        self.commit(&mut state, |s| {
            s.allocations.retain(|a| a.request_id != request_id);
            true
        })
    }

    async fn list_allocations(&self) -> Result<Vec<Allocation>, StoreError> {
        Ok(self.state.read().await.allocations.clone())
    }
}
