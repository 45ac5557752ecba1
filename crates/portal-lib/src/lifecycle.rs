//! Request lifecycle state machine
//!
//! Requests start `pending` and move exactly once to `approved`,
//! `rejected` or `cancelled`. Operations on one request id are serialized
//! through a per-id mutex; approvals additionally take the ledger mutex so
//! the capacity check and the allocation write happen atomically with
//! respect to other approvals. Lock entries live only while an operation
//! on that id is in progress.

use crate::capacity::{CapacityLedger, CapacityReport, CapacitySource};
use crate::error::{PortalError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{Allocation, RequestState, ResourceRequest};
use crate::observability::{PortalMetrics, StructuredLogger};
use crate::store::Store;
use crate::submission::SubmitRequest;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Optional filters for listing requests
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub owner: Option<String>,
    pub state: Option<RequestState>,
}

impl RequestFilter {
    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            state: None,
        }
    }

    fn matches(&self, request: &ResourceRequest) -> bool {
        self.owner.as_deref().map_or(true, |o| request.owner == o)
            && self.state.map_or(true, |s| request.state == s)
    }
}

pub struct LifecycleManager {
    store: Arc<dyn Store>,
    capacity: Arc<dyn CapacitySource>,
    cluster_target: String,
    request_locks: DashMap<String, Arc<Mutex<()>>>,
    ledger_lock: Mutex<()>,
    metrics: PortalMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    store_failed: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        capacity: Arc<dyn CapacitySource>,
        cluster_target: impl Into<String>,
    ) -> Self {
        Self {
            store,
            capacity,
            cluster_target: cluster_target.into(),
            request_locks: DashMap::new(),
            ledger_lock: Mutex::new(()),
            metrics: PortalMetrics::new(),
            logger: StructuredLogger::new("lifecycle"),
            health: None,
            store_failed: AtomicBool::new(false),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Report store failures on the store health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.request_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `id` unless another caller still holds its lock
    fn release_lock(&self, id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.request_locks
            .remove_if(id, |_, l| Arc::strong_count(l) == 1);
    }

    async fn load(&self, id: &str) -> Result<ResourceRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| PortalError::request_not_found(id))
    }

    fn ensure_pending(request: &ResourceRequest) -> Result<()> {
        if request.state.is_terminal() {
            return Err(PortalError::InvalidState {
                id: request.id.clone(),
                state: request.state,
            });
        }
        Ok(())
    }

    async fn record<T>(&self, operation: &str, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        self.metrics.record_transition(operation, outcome);

        let Some(health) = &self.health else {
            return;
        };
        match result {
            Err(PortalError::Store(e)) => {
                self.store_failed.store(true, Ordering::SeqCst);
                health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
            }
            Ok(_) if self.store_failed.swap(false, Ordering::SeqCst) => {
                health.set_healthy(components::STORE).await;
            }
            _ => {}
        }
    }

    /// Validate and persist a new pending request
    pub async fn submit(&self, input: SubmitRequest) -> Result<ResourceRequest> {
        let result = self.submit_inner(input).await;
        self.record("submit", &result).await;
        result
    }

    async fn submit_inner(&self, input: SubmitRequest) -> Result<ResourceRequest> {
        let valid = input.validate()?;
        let now = Utc::now();

        let request = ResourceRequest {
            id: uuid::Uuid::new_v4().to_string(),
            project_name: valid.project_name,
            owner: valid.owner,
            organisation: valid.organisation,
            summary: valid.summary,
            preferred_runtime: valid.preferred_runtime,
            preferred_image: valid.preferred_image,
            tags: valid.tags,
            deadline: valid.deadline,
            requirements: valid.requirements,
            state: RequestState::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_request(request.clone()).await?;
        self.logger
            .log_request_submitted(&request.id, &request.owner, &request.project_name);
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> Result<ResourceRequest> {
        self.load(id).await
    }

    /// Requests in submission order, optionally filtered
    pub async fn list(&self, filter: &RequestFilter) -> Result<Vec<ResourceRequest>> {
        let requests = self.store.list_requests().await?;
        Ok(requests.into_iter().filter(|r| filter.matches(r)).collect())
    }

    pub async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        Ok(self.store.list_allocations().await?)
    }

    pub async fn allocation_for(&self, request_id: &str) -> Result<Option<Allocation>> {
        Ok(self.store.allocation_for_request(request_id).await?)
    }

    /// Withdraw a pending request
    pub async fn cancel(&self, id: &str) -> Result<ResourceRequest> {
        let result = self.finish(id, RequestState::Cancelled, None).await;
        if result.is_ok() {
            self.logger.log_request_cancelled(id);
        }
        self.record("cancel", &result).await;
        result
    }

    /// Operator refusal of a pending request
    pub async fn reject(&self, id: &str, reason: Option<String>) -> Result<ResourceRequest> {
        let result = self.finish(id, RequestState::Rejected, reason).await;
        if let Ok(request) = &result {
            self.logger
                .log_request_rejected(id, request.rejection_reason.as_deref());
        }
        self.record("reject", &result).await;
        result
    }

    /// Move a pending request to a terminal state without an allocation
    async fn finish(
        &self,
        id: &str,
        state: RequestState,
        reason: Option<String>,
    ) -> Result<ResourceRequest> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.finish_locked(id, state, reason).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn finish_locked(
        &self,
        id: &str,
        state: RequestState,
        reason: Option<String>,
    ) -> Result<ResourceRequest> {
        let mut request = self.load(id).await?;
        Self::ensure_pending(&request)?;

        request.state = state;
        request.rejection_reason = reason.filter(|r| !r.trim().is_empty());
        request.updated_at = Utc::now();

        if !self.store.update_request(request.clone()).await? {
            return Err(PortalError::request_not_found(id));
        }
        Ok(request)
    }

    /// Grant a pending request, creating its allocation
    pub async fn approve(&self, id: &str) -> Result<Allocation> {
        let result = self.approve_inner(id).await;
        self.record("approve", &result).await;
        result
    }

    async fn approve_inner(&self, id: &str) -> Result<Allocation> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.approve_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn approve_locked(&self, id: &str) -> Result<Allocation> {
        let mut request = self.load(id).await?;
        Self::ensure_pending(&request)?;

        let total = self.capacity.total_capacity().await?;

        // Allocations are read under the ledger lock so a losing approval
        // sees the winner's grant.
        let _ledger = self.ledger_lock.lock().await;
        let allocations = self.store.list_allocations().await?;

        if let Some(shortfall) =
            CapacityLedger::would_exceed(&total, &allocations, &request.requirements)
        {
            self.logger.log_capacity_exceeded(
                id,
                shortfall.dimension.as_str(),
                shortfall.requested,
                shortfall.available,
                shortfall.shortfall,
            );
            return Err(shortfall.into());
        }

        let allocation = Allocation {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            namespace: namespace_for(&request),
            granted: request.requirements,
            cluster_target: self.cluster_target.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_allocation(allocation.clone()).await?;

        request.state = RequestState::Approved;
        request.updated_at = Utc::now();
        let updated = match self.store.update_request(request).await {
            Ok(updated) => updated,
            Err(e) => {
                self.rollback_allocation(id).await;
                return Err(e.into());
            }
        };
        if !updated {
            self.rollback_allocation(id).await;
            return Err(PortalError::request_not_found(id));
        }

        self.metrics
            .set_active_allocations(allocations.len() as i64 + 1);
        self.logger
            .log_request_approved(id, &allocation.id, &allocation.namespace);
        Ok(allocation)
    }

    async fn rollback_allocation(&self, request_id: &str) {
        if let Err(e) = self.store.delete_allocation_for_request(request_id).await {
            error!(request_id = %request_id, error = %e, "Failed to roll back allocation");
        }
    }

    /// Remove a request and its allocation; absent ids are a no-op
    ///
    /// Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.delete_locked(id).await
        };
        self.release_lock(id, lock);

        self.record("delete", &result).await;
        result
    }

    async fn delete_locked(&self, id: &str) -> Result<bool> {
        let had_allocation = self.store.allocation_for_request(id).await?.is_some();
        let removed = self.store.delete_request(id).await?;
        if removed {
            self.logger.log_request_deleted(id, had_allocation);
        } else {
            debug!(request_id = %id, "Delete of absent request ignored");
        }
        Ok(removed)
    }

    /// Total, granted and available capacity
    pub async fn capacity_report(&self) -> Result<CapacityReport> {
        let total = self.capacity.total_capacity().await?;
        let allocations = self.store.list_allocations().await?;
        self.metrics.set_active_allocations(allocations.len() as i64);
        Ok(CapacityLedger::report(&total, &allocations))
    }
}

/// Namespace handle: project slug plus a short request id suffix
fn namespace_for(request: &ResourceRequest) -> String {
    let mut slug = String::new();
    for c in request.project_name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.trim_end_matches('-').chars().take(40).collect();
    if slug.is_empty() {
        slug.push_str("project");
    }

    let suffix: String = request.id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{}-{}", slug.trim_end_matches('-'), suffix)
}
