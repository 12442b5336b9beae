use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rtun_core::models::HealthResponse;

use crate::state::EdgeState;

async fn health(State(state): State<Arc<EdgeState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        domain: state.settings.edge.domain.clone(),
    })
}

pub fn router() -> Router<Arc<EdgeState>> {
    Router::new().route("/api/health", get(health))
}
