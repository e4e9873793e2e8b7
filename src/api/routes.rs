use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, stream::hunt_stream};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Hunt endpoints
        .route("/api/hunt", post(handlers::post_hunt))
        .route("/api/hunt/stream", get(hunt_stream))
        // Agent registry
        .route("/api/agents", get(handlers::get_agents))
        .route("/api/agents", post(handlers::post_agent))
        // Status endpoints
        .route("/api/reputation", get(handlers::get_reputation))
        .route("/api/circuits", get(handlers::get_circuits))
        .route("/api/settlements", get(handlers::get_settlements))
        // Autopilot control
        .route("/api/autopilot", get(handlers::get_autopilot))
        .route("/api/autopilot/start", post(handlers::start_autopilot))
        .route("/api/autopilot/stop", post(handlers::stop_autopilot))
        // Cached reports
        .route("/api/reports/:id", get(handlers::get_report))
        // Health
        .route("/api/health", get(handlers::get_health))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
