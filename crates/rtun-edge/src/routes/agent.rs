//! Command/heartbeat plane REST endpoints (C7, §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rtun_core::models::{
    CommandProjectView, CommandView, CommandsResponse, CompleteCommandRequest, HeartbeatRequest,
    HeartbeatResponse, Id,
};

use crate::auth::authenticate_agent;
use crate::state::EdgeState;

async fn heartbeat(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let Some(agent) = authenticate_agent(&headers, &state.store).await else {
        return (StatusCode::UNAUTHORIZED, "invalid agent credentials").into_response();
    };
    match state.store.record_heartbeat(agent.id, body.system_info).await {
        Ok(()) => Json(HeartbeatResponse { success: true }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn commands(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(agent) = authenticate_agent(&headers, &state.store).await else {
        return (StatusCode::UNAUTHORIZED, "invalid agent credentials").into_response();
    };

    let mut views = Vec::new();
    for command in state.store.pending_commands(agent.id).await {
        let Some(project) = state.store.get_project(command.project_id).await else {
            continue;
        };
        views.push(CommandView {
            id: command.id,
            action: command.action,
            project: CommandProjectView {
                id: project.id,
                name: project.name,
                path: project.path,
                command: project.command,
                port: project.port,
            },
        });
    }
    Json(CommandsResponse { commands: views }).into_response()
}

async fn complete(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
    Path(command_id): Path<Id>,
    Json(body): Json<CompleteCommandRequest>,
) -> impl IntoResponse {
    if authenticate_agent(&headers, &state.store).await.is_none() {
        return (StatusCode::UNAUTHORIZED, "invalid agent credentials").into_response();
    }
    match state
        .store
        .complete_command(command_id, body.success, body.message, body.pid)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router() -> Router<Arc<EdgeState>> {
    Router::new()
        .route("/api/agent/heartbeat", post(heartbeat))
        .route("/api/agent/commands", get(commands))
        .route("/api/agent/commands/:id/complete", post(complete))
}
