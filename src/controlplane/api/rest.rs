//! REST API Handlers
//!
//! Pods, machines and rack controllers over JSON. Errors map to status codes
//! by their category: validation failures are 400, connectivity failures 503,
//! driver failures 502 and missing records 404.

use crate::controlplane::compose::ComposeRequest;
use crate::controlplane::{ComposeOptions, PodOrchestrator, PodRequest, PodUpdate};
use crate::error::{Error, ErrorCategory};
use crate::model::{BmcId, NodeId};
use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Compose on one pod
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodComposeRequest {
    #[serde(flatten)]
    pub request: ComposeRequest,
    #[serde(default)]
    pub skip_commissioning: bool,
}

/// Compose on whichever pod fits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetComposeRequest {
    #[serde(flatten)]
    pub request: ComposeRequest,
    /// Restrict the candidates to these pods
    #[serde(default)]
    pub pods: Option<Vec<BmcId>>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<PodOrchestrator>,
    max_body_size: usize,
    request_timeout: Duration,
}

impl RestRouter {
    pub fn new(orchestrator: Arc<PodOrchestrator>) -> Self {
        Self {
            orchestrator,
            max_body_size: 2 * 1024 * 1024,
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            // Pod endpoints
            .route("/v1/pods", get(list_pods).post(create_pod))
            .route(
                "/v1/pods/:id",
                get(get_pod).put(update_pod).delete(delete_pod),
            )
            .route("/v1/pods/:id/refresh", post(refresh_pod))
            .route("/v1/pods/:id/compose", post(compose_on_pod))
            .route("/v1/compose", post(compose_on_fleet))
            // Machine endpoints
            .route("/v1/machines", get(list_machines))
            .route("/v1/machines/:id", get(get_machine).delete(delete_machine))
            // Rack controllers
            .route("/v1/racks", get(list_racks))
            .route("/v1/status", get(get_status))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<PodOrchestrator>,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(err: &Error) -> StatusCode {
    if let Error::NotFound { .. } = err {
        return StatusCode::NOT_FOUND;
    }
    match err.category() {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Connectivity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::RemoteOperation => StatusCode::BAD_GATEWAY,
        ErrorCategory::DataConsistency | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_code(err: &Error) -> &'static str {
    match err {
        Error::NotFound { .. } => "not_found",
        Error::FieldValidation { .. } => "invalid_field",
        Error::OverCommit(_) => "over_commit",
        Error::PodExists => "pod_exists",
        Error::NoMatchingPods => "no_matching_pods",
        _ => match err.category() {
            ErrorCategory::Validation => "invalid_request",
            ErrorCategory::Connectivity => "unreachable",
            ErrorCategory::RemoteOperation => "pod_problem",
            ErrorCategory::DataConsistency => "inconsistent_data",
            ErrorCategory::Internal => "internal_error",
        },
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    let field = match &err {
        Error::FieldValidation { field, .. } => Some(field.clone()),
        _ => None,
    };
    (
        status,
        Json(ApiErrorResponse {
            error: error_code(&err).into(),
            message: err.to_string(),
            field,
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: crate::error::Result<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Pod Handlers
// =============================================================================

async fn list_pods(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.pods().await)
}

async fn create_pod(
    State(state): State<AppState>,
    Json(request): Json<PodRequest>,
) -> Response {
    info!("Creating '{}' pod", request.power_type);
    respond(
        StatusCode::CREATED,
        state.orchestrator.create_pod(request).await,
    )
}

async fn get_pod(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(StatusCode::OK, state.orchestrator.pod(BmcId(id)).await)
}

async fn update_pod(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<PodUpdate>,
) -> Response {
    respond(
        StatusCode::OK,
        state.orchestrator.update_pod(BmcId(id), update).await,
    )
}

async fn refresh_pod(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(StatusCode::OK, state.orchestrator.refresh_pod(BmcId(id)).await)
}

async fn delete_pod(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(StatusCode::OK, state.orchestrator.delete_pod(BmcId(id)).await)
}

async fn compose_on_pod(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<PodComposeRequest>,
) -> Response {
    let options = ComposeOptions {
        skip_commissioning: body.skip_commissioning,
        ..Default::default()
    };
    respond(
        StatusCode::CREATED,
        state
            .orchestrator
            .compose(BmcId(id), &body.request, options)
            .await,
    )
}

async fn compose_on_fleet(
    State(state): State<AppState>,
    Json(body): Json<FleetComposeRequest>,
) -> Response {
    respond(
        StatusCode::CREATED,
        state
            .orchestrator
            .compose_for_pods(&body.request, body.pods.as_deref())
            .await,
    )
}

// =============================================================================
// Machine Handlers
// =============================================================================

async fn list_machines(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.machines().await)
}

async fn get_machine(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(StatusCode::OK, state.orchestrator.machine(NodeId(id)).await)
}

async fn delete_machine(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    respond(
        StatusCode::OK,
        state.orchestrator.delete_machine(NodeId(id)).await,
    )
}

async fn list_racks(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.racks().await)
}

async fn get_status(State(state): State<AppState>) -> Response {
    respond(StatusCode::OK, state.orchestrator.status().await)
}

// =============================================================================
// Health
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once at least one rack controller is connected
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.connected_racks() > 0 {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no rack controllers connected")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{SimulatedPod, SimulatedRack};
    use crate::controlplane::OrchestratorConfig;
    use crate::power::PowerDriverRegistry;
    use crate::rpc::ClientRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const ADDRESS: &str = "qemu+ssh://10.0.0.5/system";

    fn router(with_rack: bool) -> Router {
        let config = OrchestratorConfig::default();
        let store = config.new_store();
        let registry = ClientRegistry::new();
        if with_rack {
            let rack = SimulatedRack::new("rack-a");
            rack.attach(SimulatedPod::new(ADDRESS, 4, 8192));
            registry.register(rack);
        }
        let orchestrator = PodOrchestrator::with_store_commissioning(
            config,
            store,
            registry,
            Arc::new(PowerDriverRegistry::with_builtin().unwrap()),
        )
        .unwrap();
        RestRouter::new(orchestrator).build()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::PodExists), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::not_found("Pod", 3)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::NoRackControllers),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::PodProblem("boom".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_pod_lifecycle() {
        let app = router(true);
        let (status, body) = send(
            &app,
            "POST",
            "/v1/pods",
            serde_json::json!({
                "type": "virsh",
                "name": "kvm-01",
                "power_parameters": {"power_address": ADDRESS},
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pod"]["name"], "kvm-01");
        let id = body["pod"]["id"].as_u64().unwrap();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/pods/{}/compose", id),
            serde_json::json!({"hostname": "web-01", "cores": 2, "memory": 2048}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["hostname"], "web-01");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/pods/{}/compose", id),
            serde_json::json!({"cores": 9}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "cores");

        let uri = format!("/v1/pods/{}", id);
        let (status, body) = send(&app, "DELETE", &uri, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "GET", &uri, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_no_racks() {
        let app = router(false);
        let (status, _) = send(
            &app,
            "POST",
            "/v1/pods",
            serde_json::json!({"type": "virsh", "power_parameters": {"power_address": ADDRESS}}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
