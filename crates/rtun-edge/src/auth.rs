//! Agent authentication for the REST plane (§4.7A): accepts either the
//! current `X-Agent-API-Key` header or the legacy `X-API-Key` header, so
//! older agent builds that only send one keep working.

use axum::http::HeaderMap;
use rtun_core::models::Agent;
use rtun_core::store::SharedStore;

pub async fn authenticate_agent(headers: &HeaderMap, store: &SharedStore) -> Option<Agent> {
    let key = headers
        .get("x-agent-api-key")
        .or_else(|| headers.get("x-api-key"))
        .and_then(|v| v.to_str().ok())?;
    store.get_agent_by_key(key).await
}
