//! HTTP API for requests, capacity, fleet inventory, health and metrics

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use portal_lib::{
    fleet_summary,
    health::{ComponentStatus, HealthRegistry},
    CapacityReport, FleetAggregator, FleetSummary, LifecycleManager, NodeSnapshot,
    PortalError, RequestFilter, RequestState, SubmitRequest,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub fleet: Arc<FleetAggregator>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        fleet: Arc<FleetAggregator>,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            lifecycle,
            fleet,
            health_registry,
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }
}

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        let message = err.to_string();
        let code = err.code();
        match err {
            PortalError::Validation { field, .. } => {
                Self::new(StatusCode::BAD_REQUEST, code, message)
                    .with_details(serde_json::json!({ "field": field }))
            }
            PortalError::NotFound { kind, id } => Self::new(StatusCode::NOT_FOUND, code, message)
                .with_details(serde_json::json!({ "kind": kind, "id": id })),
            PortalError::InvalidState { state, .. } => {
                Self::new(StatusCode::BAD_REQUEST, code, message)
                    .with_details(serde_json::json!({ "state": state }))
            }
            PortalError::CapacityExceeded {
                dimension,
                requested,
                available,
                shortfall,
            } => Self::new(StatusCode::CONFLICT, code, message).with_details(serde_json::json!({
                "dimension": dimension,
                "requested": requested,
                "available": available,
                "shortfall": shortfall,
            })),
            PortalError::Store(_) => {
                error!(error = %message, "Store failure while serving request");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
            }
            PortalError::Registry(_) | PortalError::NoNodes => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_body(body: &Bytes) -> ApiResult<Value> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::from(PortalError::validation("body", format!("invalid JSON: {}", e))))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "metrics_error", e.to_string())
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn submit_request(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let input = SubmitRequest::from_json(parse_body(&body)?)?;
    let request = state.lifecycle.submit(input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub owner: Option<String>,
    pub state: Option<String>,
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let state_filter = match query.state.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<RequestState>()
                .map_err(|reason| PortalError::validation("state", reason))?,
        ),
        None => None,
    };
    let filter = RequestFilter {
        owner: query.owner.filter(|o| !o.is_empty()),
        state: state_filter,
    };
    Ok(Json(state.lifecycle.list(&filter).await?))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.lifecycle.get(&id).await?))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.lifecycle.cancel(&id).await?))
}

async fn approve_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let allocation = state.lifecycle.approve(&id).await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    pub reason: Option<String>,
}

async fn reject_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let reject: RejectBody = if body.iter().all(u8::is_ascii_whitespace) {
        RejectBody::default()
    } else {
        serde_json::from_value(parse_body(&body)?)
            .map_err(|e| PortalError::validation("body", e.to_string()))?
    };
    Ok(Json(state.lifecycle.reject(&id, reject.reason).await?))
}

async fn delete_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // The core delete is idempotent; the API reports unknown ids
    state.lifecycle.get(&id).await?;
    state.lifecycle.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_allocations(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.lifecycle.list_allocations().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CapacityQuery {
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityView {
    #[serde(flatten)]
    pub report: CapacityReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet: Option<FleetSummary>,
}

async fn capacity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CapacityQuery>,
) -> ApiResult<impl IntoResponse> {
    let report = state.lifecycle.capacity_report().await?;

    let fleet = if query.live {
        match state.fleet.snapshot_registered().await {
            Ok(snapshots) => Some(fleet_summary(&snapshots)),
            Err(PortalError::NoNodes) => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    Ok(Json(CapacityView { report, fleet }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshotView {
    pub nodes: Vec<NodeSnapshot>,
    pub summary: FleetSummary,
}

async fn fleet_snapshot(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let nodes = state.fleet.snapshot_registered().await?;
    let summary = fleet_summary(&nodes);
    Ok(Json(FleetSnapshotView { nodes, summary }))
}

async fn fleet_images(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.fleet.images_registered().await?))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.fleet.registered_nodes().await?))
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.fleet.node(&id).await?))
}

async fn fallback() -> ApiError {
    ApiError::not_found("route_not_found", "no such route")
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/requests", post(submit_request).get(list_requests))
        .route(
            "/api/v1/requests/:id",
            get(get_request).delete(delete_request),
        )
        .route("/api/v1/requests/:id/cancel", post(cancel_request))
        .route("/api/v1/requests/:id/approve", post(approve_request))
        .route("/api/v1/requests/:id/reject", post(reject_request))
        .route("/api/v1/allocations", get(list_allocations))
        .route("/api/v1/capacity", get(capacity))
        .route("/api/v1/fleet/snapshot", get(fleet_snapshot))
        .route("/api/v1/fleet/images", get(fleet_images))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:id", get(get_node))
        .fallback(fallback)
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
