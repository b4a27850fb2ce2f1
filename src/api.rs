//! HTTP surface (§4.13, §6): a thin `axum` router over [`DispatchEngine`].
//! Every handler is a pass-through to the engine — no business logic lives
//! here, per SPEC_FULL.md §4.13.
//!
//! Grounded on `original_source/.../rest_api.py`: same endpoints, same
//! request/response shapes (`CreateCallRequest`/`CallResponse`/
//! `CreateAgentRequest`/`AgentResponse`/`UpdateAgentStatusRequest`/
//! `AssignmentResponse`/`SystemStatusResponse` become the serde structs
//! below), same CORS-everywhere stance — ported from FastAPI's
//! `CORSMiddleware(allow_origins=["*"])` to `tower_http::cors::CorsLayer::
//! permissive()`, which the teacher crate already reaches for on its own
//! HTTP surfaces (`tower-http` carries the `cors` feature in the workspace
//! dependency table).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::dispatcher::DispatchEngine;
use crate::error::DispatchError;
use crate::types::{Agent, AgentStatus, Call};

/// Builds the full router, wiring every endpoint enumerated in §6 to the
/// shared [`DispatchEngine`] (§4.13).
pub fn router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/calls", post(create_and_assign_call))
        .route("/calls/:id", delete(abandon_call))
        .route("/calls/:id", get(get_call))
        .route("/agents", post(create_agent))
        .route("/agents", get(list_agents))
        .route("/agents/available", get(list_available_agents))
        .route("/agents/:id", get(get_agent))
        .route("/agents/:id/status", put(update_agent_status))
        .route("/system/status", get(system_status))
        .route("/system/metrics", get(system_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Wraps [`DispatchError`] for the one place in the crate that turns it into
/// an HTTP status (§4.12: the HTTP layer converts errors to statuses at the
/// boundary).
struct ApiError(DispatchError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::InvalidConfig(_) | DispatchError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self.0, "request failed");
        (status, Json(ErrorBody { detail: self.0.to_string() })).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

type ApiResult<T> = Result<T, ApiError>;

// --- health -------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    webhook_reachable: bool,
}

async fn health(State(engine): State<Arc<DispatchEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        webhook_reachable: engine.health_check().await,
    })
}

// --- calls ----------------------------------------------------------------

#[derive(Deserialize)]
struct CreateCallRequest {
    phone_number: String,
    call_type: String,
}

#[derive(Serialize)]
struct AssignmentResponse {
    success: bool,
    assignment_id: Option<String>,
    agent_id: Option<String>,
    call_id: String,
    assignment_time_ms: f64,
    message: String,
}

async fn create_and_assign_call(
    State(engine): State<Arc<DispatchEngine>>,
    Json(request): Json<CreateCallRequest>,
) -> ApiResult<(StatusCode, Json<AssignmentResponse>)> {
    if !engine.config().call_types.contains(&request.call_type) {
        return Err(ApiError(DispatchError::InvalidConfig(format!(
            "invalid call_type {:?}, must be one of {:?}",
            request.call_type,
            engine.config().call_types
        ))));
    }

    let call = Call::new(request.phone_number, request.call_type);
    let call_id = call.id.clone();
    let result = engine.assign_call(call).await;

    Ok((
        StatusCode::CREATED,
        Json(AssignmentResponse {
            success: result.success,
            assignment_id: result.assignment.map(|a| a.id),
            agent_id: result.agent.map(|a| a.id),
            call_id,
            assignment_time_ms: result.assignment_time_ms,
            message: result.message,
        }),
    ))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn abandon_call(
    State(engine): State<Arc<DispatchEngine>>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let abandoned = engine.abandon_call(&call_id).await?;
    if !abandoned {
        return Err(ApiError(DispatchError::NotFound {
            kind: "call",
            id: call_id,
        }));
    }
    Ok(Json(MessageResponse {
        message: format!("call {call_id} abandoned"),
    }))
}

#[derive(Serialize)]
struct CallResponse {
    id: String,
    phone_number: String,
    call_type: String,
    status: String,
    assigned_agent_id: Option<String>,
    qualification_result: String,
    created_at: String,
    assigned_at: Option<String>,
    completed_at: Option<String>,
    duration_seconds: Option<f64>,
    wait_time_seconds: Option<f64>,
}

impl From<Call> for CallResponse {
    fn from(call: Call) -> Self {
        Self {
            id: call.id.clone(),
            phone_number: call.phone_number.clone(),
            call_type: call.call_type.clone(),
            status: call.status.as_str().to_string(),
            assigned_agent_id: call.assigned_agent_id.clone(),
            qualification_result: call.qualification_result.as_str().to_string(),
            created_at: call.created_at.to_rfc3339(),
            assigned_at: call.assigned_at.map(|t| t.to_rfc3339()),
            completed_at: call.completed_at.map(|t| t.to_rfc3339()),
            duration_seconds: call.duration_seconds,
            wait_time_seconds: call.wait_time_seconds(),
        }
    }
}

async fn get_call(
    State(engine): State<Arc<DispatchEngine>>,
    Path(call_id): Path<String>,
) -> ApiResult<Json<CallResponse>> {
    let call = engine
        .store()
        .get_call(&call_id)
        .await?
        .ok_or(DispatchError::NotFound { kind: "call", id: call_id })?;
    Ok(Json(call.into()))
}

// --- agents -----------------------------------------------------------

#[derive(Deserialize)]
struct CreateAgentRequest {
    name: String,
    agent_type: String,
}

#[derive(Serialize)]
struct AgentResponse {
    id: String,
    name: String,
    agent_type: String,
    status: String,
    last_call_end_time: Option<String>,
    current_call_id: Option<String>,
    created_at: String,
    updated_at: String,
    idle_time_seconds: Option<f64>,
}

impl From<Agent> for AgentResponse {
    fn from(agent: Agent) -> Self {
        let idle_time_seconds = agent.is_available().then(|| agent.idle_seconds());
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            agent_type: agent.agent_type.clone(),
            status: agent.status.as_str().to_string(),
            last_call_end_time: agent.last_call_end_time.map(|t| t.to_rfc3339()),
            current_call_id: agent.current_call_id.clone(),
            created_at: agent.created_at.to_rfc3339(),
            updated_at: agent.updated_at.to_rfc3339(),
            idle_time_seconds,
        }
    }
}

async fn create_agent(
    State(engine): State<Arc<DispatchEngine>>,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<AgentResponse>)> {
    if !engine.config().agent_types.contains(&request.agent_type) {
        return Err(ApiError(DispatchError::InvalidConfig(format!(
            "invalid agent_type {:?}, must be one of {:?}",
            request.agent_type,
            engine.config().agent_types
        ))));
    }

    let agent = Agent::new(request.name, request.agent_type, AgentStatus::Offline);
    engine.register_agent(agent.clone()).await?;
    Ok((StatusCode::CREATED, Json(agent.into())))
}

async fn list_agents(State(engine): State<Arc<DispatchEngine>>) -> Json<Vec<AgentResponse>> {
    Json(engine.store().all_agents().into_iter().map(AgentResponse::from).collect())
}

async fn list_available_agents(State(engine): State<Arc<DispatchEngine>>) -> Json<Vec<AgentResponse>> {
    let mut agents: Vec<Agent> = engine
        .store()
        .all_agents()
        .into_iter()
        .filter(|a| a.status == AgentStatus::Available)
        .collect();
    agents.sort_by(|a, b| b.idle_seconds().partial_cmp(&a.idle_seconds()).unwrap());
    Json(agents.into_iter().map(AgentResponse::from).collect())
}

async fn get_agent(
    State(engine): State<Arc<DispatchEngine>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentResponse>> {
    let agent = engine
        .store()
        .get_agent(&agent_id)
        .await?
        .ok_or(DispatchError::NotFound { kind: "agent", id: agent_id })?;
    Ok(Json(agent.into()))
}

#[derive(Deserialize)]
struct UpdateAgentStatusRequest {
    status: String,
}

fn parse_status(s: &str) -> ApiResult<AgentStatus> {
    match s {
        "AVAILABLE" => Ok(AgentStatus::Available),
        "BUSY" => Ok(AgentStatus::Busy),
        "PAUSED" => Ok(AgentStatus::Paused),
        "OFFLINE" => Ok(AgentStatus::Offline),
        other => Err(ApiError(DispatchError::InvalidConfig(format!(
            "invalid status {other:?}, must be one of AVAILABLE, BUSY, PAUSED, OFFLINE"
        )))),
    }
}

async fn update_agent_status(
    State(engine): State<Arc<DispatchEngine>>,
    Path(agent_id): Path<String>,
    Json(request): Json<UpdateAgentStatusRequest>,
) -> ApiResult<Json<AgentResponse>> {
    let status = parse_status(&request.status)?;
    engine.set_agent_status(&agent_id, status).await?;
    let agent = engine
        .store()
        .get_agent(&agent_id)
        .await?
        .ok_or(DispatchError::NotFound { kind: "agent", id: agent_id })?;
    Ok(Json(agent.into()))
}

// --- system ----------------------------------------------------------

async fn system_status(State(engine): State<Arc<DispatchEngine>>) -> Json<serde_json::Value> {
    Json(engine.system_status().await)
}

#[derive(Serialize)]
struct MetricsResponse {
    timestamp: String,
    metrics: std::collections::HashMap<String, f64>,
}

async fn system_metrics(State(engine): State<Arc<DispatchEngine>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        metrics: engine.metrics().snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let engine = DispatchEngine::new_in_memory(DispatchConfig::default()).await.unwrap();
        router(engine)
    }

    #[tokio::test]
    async fn health_endpoint_returns_200() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_agent_then_fetch_round_trips() {
        let app = test_app().await;
        let body = serde_json::json!({"name": "Agent_001", "agent_type": "agente_tipo_1"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn create_call_with_unknown_type_is_bad_request() {
        let app = test_app().await;
        let body = serde_json::json!({"phone_number": "+15550000", "call_type": "not-a-real-type"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/calls")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_unknown_call_is_not_found() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/calls/does-not-exist").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
