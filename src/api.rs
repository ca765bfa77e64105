//! REST API Server for the Deep Research Orchestrator
//!
//! Exposes the research workflow over HTTP: start a run, inspect its
//! suspended state, deliver an approval signal, or fire a one-shot routed
//! query. The approval endpoints are the wire form of the human-in-the-loop
//! boundary.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::{ApprovalSignal, WorkflowState};
use crate::router::TaskRouter;
use crate::state::RunStore;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResearchRequest {
    pub task: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub router: Arc<TaskRouter>,
    pub runs: Arc<dyn RunStore>,
}

fn run_view(state: &WorkflowState) -> serde_json::Value {
    serde_json::json!({
        "run_id": state.run_id,
        "task": state.task,
        "phase": state.phase,
        "plan": state.plan,
        "cursor": state.cursor,
        "step_results": state.step_results,
        "final_report": state.final_report,
        "created_at": state.created_at,
        "updated_at": state.updated_at,
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Research Workflow Endpoints
/// =============================

async fn start_research(
    State(state): State<ApiState>,
    Json(req): Json<ResearchRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received research request: {}", req.task);

    match state.orchestrator.start(&req.task).await {
        Ok(run) => {
            let view = run_view(&run);
            if let Err(e) = state.runs.save(run).await {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(format!("Failed to store run: {}", e))),
                );
            }
            (StatusCode::OK, Json(ApiResponse::success(view)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Research start failed: {}", e))),
        ),
    }
}

async fn get_research(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.runs.load(run_id).await {
        Ok(run) => (StatusCode::OK, Json(ApiResponse::success(run_view(&run)))),
        Err(e @ OrchestrationError::RunNotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string())))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn resolve_approval(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
    Json(signal): Json<ApprovalSignal>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(run_id = %run_id, signal = ?signal, "Approval signal received");

    let run = match state.runs.load(run_id).await {
        Ok(run) => run,
        Err(e @ OrchestrationError::RunNotFound(_)) => {
            return (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string())));
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            );
        }
    };

    match state.orchestrator.resume(run, signal).await {
        Ok(resumed) => {
            let view = run_view(&resumed);
            if let Err(e) = state.runs.save(resumed).await {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(format!("Failed to store run: {}", e))),
                );
            }
            (StatusCode::OK, Json(ApiResponse::success(view)))
        }
        Err(e @ OrchestrationError::IllegalTransition(_)) => {
            (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string())))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// =============================
/// Routed One-Shot Queries
/// =============================

async fn route_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received routed query: {}", req.query);

    let answer = state.router.route(&req.query).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "answer": answer,
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(
    orchestrator: Arc<Orchestrator>,
    router: Arc<TaskRouter>,
    runs: Arc<dyn RunStore>,
) -> Router {
    let state = ApiState {
        orchestrator,
        router,
        runs,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/research", post(start_research))
        .route("/api/research/:id", get(get_research))
        .route("/api/research/:id/approval", post(resolve_approval))
        .route("/api/query", post(route_query))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    router: Arc<TaskRouter>,
    runs: Arc<dyn RunStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let app = create_router(orchestrator, router, runs);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
