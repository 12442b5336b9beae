//! Server side of the control-channel protocol (C5): WebSocket upgrade,
//! handshake, and the per-tunnel reader/writer task pair that multiplexes
//! many in-flight HTTP exchanges over one socket (§5).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use rtun_core::models::{Id, ProjectStatus};
use rtun_core::subdomain;
use rtun_protocol::{Frame, MAX_FRAME_BYTES};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::EdgeState;

#[derive(Debug, Deserialize)]
pub struct TunnelQuery {
    pub project_id: Id,
    pub api_key: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TunnelQuery>,
    State(state): State<Arc<EdgeState>>,
) -> impl IntoResponse {
    // Cap both directions of a frame at 10 MiB (§4.5); a misbehaving or
    // hostile agent can't force unbounded buffering on the edge.
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_tunnel(socket, query, state))
}

async fn allocate_subdomain(state: &EdgeState, base_name: &str, owner: &str) -> String {
    let base = subdomain::normalize(&format!("{base_name}-{owner}"));
    let base = if subdomain::is_valid(&base) {
        base
    } else {
        subdomain::normalize(&format!("project-{owner}"))
    };

    if !state.store.subdomain_taken(&base).await {
        return base;
    }
    for n in 1..=1000 {
        let candidate = format!("{base}-{n}");
        if !state.store.subdomain_taken(&candidate).await {
            return candidate;
        }
    }
    format!("{base}-{}", rtun_protocol::generate_request_id())
}

async fn handle_tunnel(socket: WebSocket, query: TunnelQuery, state: Arc<EdgeState>) {
    let (mut sink, mut stream) = socket.split();

    let agent = match state.store.get_agent_by_key(&query.api_key).await {
        Some(a) => a,
        None => {
            let _ = sink
                .send(Message::Text(
                    Frame::Error {
                        message: "invalid api key".into(),
                    }
                    .to_json(),
                ))
                .await;
            return;
        }
    };

    let mut project = match state.store.get_project(query.project_id).await {
        Some(p) => p,
        None => {
            let _ = sink
                .send(Message::Text(
                    Frame::Error {
                        message: "project not found".into(),
                    }
                    .to_json(),
                ))
                .await;
            return;
        }
    };

    if project.agent_id != Some(agent.id) {
        let _ = sink
            .send(Message::Text(
                Frame::Error {
                    message: "project is not owned by this agent".into(),
                }
                .to_json(),
            ))
            .await;
        return;
    }

    if project.subdomain.is_none() {
        let generated = allocate_subdomain(&state, &project.name, &agent.owner).await;
        project.subdomain = Some(generated);
    }
    let subdomain = project.subdomain.clone().unwrap();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    if !state.registry.register(&subdomain, project.id, outbound_tx) {
        let _ = sink
            .send(Message::Text(
                Frame::Error {
                    message: "tunnel already active for this project".into(),
                }
                .to_json(),
            ))
            .await;
        return;
    }

    project.status = ProjectStatus::Running;
    project.last_started = Some(chrono::Utc::now());
    if let Err(e) = state.store.put_project(project.clone()).await {
        warn!("failed to persist project after tunnel handshake: {e}");
    }

    let url = format!("https://{subdomain}.{}", state.settings.edge.domain);
    let connected = Frame::Connected {
        subdomain: subdomain.clone(),
        url,
        project_id: project.id,
        project_name: project.name.clone(),
    };
    if sink.send(Message::Text(connected.to_json())).await.is_err() {
        state.registry.deregister(&subdomain);
        return;
    }

    info!(subdomain, project_id = project.id, "tunnel handshake complete");

    // Single writer owns the sink; every ingress task reaches it only
    // through `outbound_tx` (§5's per-channel outbound queue discipline).
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_inbound_frame(&state, &text),
            Message::Binary(bytes) => {
                if let Ok(text) = String::from_utf8(bytes) {
                    handle_inbound_frame(&state, &text);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.registry.deregister(&subdomain);
    if let Some(mut p) = state.store.get_project(project.id).await {
        p.status = ProjectStatus::Stopped;
        let _ = state.store.put_project(p).await;
    }
    info!(subdomain, "tunnel closed");
}

fn handle_inbound_frame(state: &EdgeState, text: &str) {
    let frame = match Frame::from_json(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("malformed frame from agent: {e}");
            return;
        }
    };
    match frame {
        Frame::HttpResponse { ref request_id, .. } => {
            state.registry.resolve(request_id, frame.clone());
        }
        Frame::Ping | Frame::Pong => {}
        other => {
            warn!(?other, "unexpected frame type from agent");
        }
    }
}
