use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use crate::api::state::AppState;
use crate::api::types::{
    ApiError, ComponentHealth, HealthResponse, HealthStatus, HuntRequest,
};
use crate::autopilot::HuntRunner;
use crate::domain::AgentDescriptor;

/// POST /api/hunt — synchronous hunt, returns the full synthesis
pub async fn post_hunt(
    State(state): State<AppState>,
    Json(request): Json<HuntRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let synthesis = state.coordinator.run_hunt(&request.topic).await?;
    Ok(Json(synthesis))
}

/// POST /api/agents — register an agent at runtime
pub async fn post_agent(
    State(state): State<AppState>,
    Json(descriptor): Json<AgentDescriptor>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.register_agent(descriptor).await?;
    Ok(StatusCode::CREATED)
}

/// GET /api/agents
pub async fn get_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.agents().await)
}

/// GET /api/reputation
pub async fn get_reputation(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.reputation().await)
}

/// GET /api/circuits
pub async fn get_circuits(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.circuits().await)
}

/// GET /api/settlements — pending and settled, one payload
pub async fn get_settlements(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state.coordinator.pending_settlements().await;
    let history = state.coordinator.settlement_history().await;
    Json(serde_json::json!({
        "pending": pending,
        "history": history,
    }))
}

/// GET /api/autopilot
pub async fn get_autopilot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.autopilot_status().await)
}

/// POST /api/autopilot/start — idempotent
pub async fn start_autopilot(State(state): State<AppState>) -> impl IntoResponse {
    let runner: Arc<dyn HuntRunner> = state.coordinator.clone();
    let status = state.coordinator.autopilot().start(runner).await;
    Json(status)
}

/// POST /api/autopilot/stop — idempotent
pub async fn stop_autopilot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.autopilot().stop().await)
}

/// GET /api/reports/:id — cached synthesis lookup
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.report(&id).await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "report not found or expired" })),
        )
            .into_response(),
    }
}

/// GET /api/health
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let pending = coordinator.pending_settlements().await.len();
    let autopilot = coordinator.autopilot_status().await;
    let (hits, misses) = coordinator.cache_hit_counts();

    let mut components = vec![
        ComponentHealth {
            name: "autopilot".into(),
            status: HealthStatus::Healthy,
            message: Some(format!("phase: {}", autopilot.phase)),
        },
        ComponentHealth {
            name: "report_cache".into(),
            status: HealthStatus::Healthy,
            message: Some(format!("{} reports cached", coordinator.cached_reports().await)),
        },
    ];

    // A growing settlement backlog means the price feed is struggling
    let settlement_status = if pending > 100 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    components.push(ComponentHealth {
        name: "settlement".into(),
        status: settlement_status,
        message: Some(format!("{pending} pending")),
    });

    let overall = if components.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status: overall,
        timestamp: Utc::now(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
        components,
        metrics: coordinator.metrics().snapshot(hits, misses),
    };

    let code = match overall {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}
