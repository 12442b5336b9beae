//! Thin administrative surface over FirewallRule / FirewallAccessRequest
//! (§6, bounded by §1's scope note: the full management REST API is out of
//! scope, but C3/C9 need *some* external trigger).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rtun_core::firewall::access_request;
use rtun_core::firewall::rule_io::{self, RuleBundle};
use rtun_core::models::{AccessRequestStatus, Id, RuleType};
use serde::Deserialize;
use serde_json::json;

use crate::state::EdgeState;

#[derive(Deserialize)]
pub struct NewRule {
    pub rule_type: RuleType,
    pub value: String,
    pub description: Option<String>,
}

async fn list_rules(State(state): State<Arc<EdgeState>>, Path(project_id): Path<Id>) -> impl IntoResponse {
    Json(state.store.firewall_rules(project_id).await)
}

async fn create_rule(
    State(state): State<Arc<EdgeState>>,
    Path(project_id): Path<Id>,
    Json(body): Json<NewRule>,
) -> impl IntoResponse {
    let value = if body.rule_type == RuleType::Method {
        body.value.to_uppercase()
    } else if body.rule_type == RuleType::Path && !body.value.starts_with('/') {
        format!("/{}", body.value)
    } else {
        body.value
    };

    match state
        .store
        .insert_firewall_rule(project_id, body.rule_type, value, body.description)
        .await
    {
        Ok(rule) => {
            state.rule_cache.invalidate(project_id);
            (StatusCode::CREATED, Json(rule)).into_response()
        }
        Err(e) => (StatusCode::CONFLICT, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

async fn delete_rule(
    State(state): State<Arc<EdgeState>>,
    Path((project_id, rule_id)): Path<(Id, Id)>,
) -> impl IntoResponse {
    match state.store.delete_firewall_rule(project_id, rule_id).await {
        Ok(()) => {
            state.rule_cache.invalidate(project_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

async fn export_rules(State(state): State<Arc<EdgeState>>, Path(project_id): Path<Id>) -> impl IntoResponse {
    let rules = state.store.firewall_rules(project_id).await;
    Json(rule_io::export(&rules))
}

async fn import_rules(
    State(state): State<Arc<EdgeState>>,
    Path(project_id): Path<Id>,
    Json(bundle): Json<RuleBundle>,
) -> impl IntoResponse {
    let added = rule_io::import(state.store.as_ref(), project_id, bundle).await;
    state.rule_cache.invalidate(project_id);
    Json(json!({ "added": added }))
}

#[derive(Deserialize)]
pub struct StatusFilter {
    pub status: Option<AccessRequestStatus>,
}

async fn list_access_requests(
    State(state): State<Arc<EdgeState>>,
    Path(project_id): Path<Id>,
    Query(filter): Query<StatusFilter>,
) -> impl IntoResponse {
    Json(access_request::list(state.store.as_ref(), project_id, filter.status).await)
}

#[derive(Deserialize)]
pub struct ApproveBody {
    #[serde(default = "default_duration")]
    pub duration_minutes: i64,
}

fn default_duration() -> i64 {
    5
}

async fn approve(
    State(state): State<Arc<EdgeState>>,
    Path(request_id): Path<Id>,
    Json(body): Json<ApproveBody>,
) -> impl IntoResponse {
    match access_request::approve(state.store.as_ref(), request_id, body.duration_minutes).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

async fn reject(State(state): State<Arc<EdgeState>>, Path(request_id): Path<Id>) -> impl IntoResponse {
    match access_request::reject(state.store.as_ref(), request_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

async fn revoke_one(State(state): State<Arc<EdgeState>>, Path(request_id): Path<Id>) -> impl IntoResponse {
    match access_request::revoke_by_id(state.store.as_ref(), request_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct RevokeFilter {
    pub ip_address: Option<String>,
}

async fn revoke_all(
    State(state): State<Arc<EdgeState>>,
    Path(project_id): Path<Id>,
    Json(filter): Json<RevokeFilter>,
) -> impl IntoResponse {
    match access_request::revoke_matching(state.store.as_ref(), Some(project_id), filter.ip_address.as_deref())
        .await
    {
        Ok(count) => Json(json!({ "revoked": count })).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "detail": e.to_string() }))).into_response(),
    }
}

pub fn router() -> Router<Arc<EdgeState>> {
    Router::new()
        .route("/api/projects/:id/firewall/rules", get(list_rules).post(create_rule))
        .route("/api/projects/:id/firewall/rules/:rule_id", delete(delete_rule))
        .route("/api/projects/:id/firewall/export", get(export_rules))
        .route("/api/projects/:id/firewall/import", post(import_rules))
        .route(
            "/api/projects/:id/firewall/access-requests",
            get(list_access_requests),
        )
        .route("/api/projects/:id/firewall/access-requests/revoke", post(revoke_all))
        .route(
            "/api/access-requests/:id/approve",
            post(approve),
        )
        .route("/api/access-requests/:id/reject", post(reject))
        .route("/api/access-requests/:id/revoke", post(revoke_one))
}
