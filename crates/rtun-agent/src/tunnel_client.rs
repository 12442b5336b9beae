//! Agent side of the control-channel protocol (C5/C8): dial `/_tunnel`,
//! complete the handshake, then forward every `http_request` frame to the
//! local app and reply with its response. Reconnects with a fixed delay
//! until told to stop.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use rtun_protocol::{decode_body, encode_body, headers as hop, Frame, MAX_FRAME_BYTES};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Mirrors the edge's `WebSocketUpgrade::max_message_size` so the same
/// 10 MiB cap (§4.5) applies to both legs of the control channel.
fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_FRAME_BYTES),
        max_frame_size: Some(MAX_FRAME_BYTES),
        ..Default::default()
    }
}

fn to_ws_url(server_url: &str, project_id: u64, api_key: &str) -> String {
    let mut url = Url::parse(server_url).unwrap_or_else(|_| {
        Url::parse(&format!("http://{server_url}")).expect("fallback base URL is well-formed")
    });
    let ws_scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    let _ = url.set_scheme(ws_scheme);
    url.set_path("/_tunnel");
    url.query_pairs_mut()
        .append_pair("project_id", &project_id.to_string())
        .append_pair("api_key", api_key);
    url.to_string()
}

/// Run the tunnel client loop until `shutdown` fires. Never returns early on
/// transport errors; it logs and reconnects after `reconnect_delay`.
pub async fn run(
    server_url: String,
    api_key: String,
    project_id: u64,
    local_port: u16,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
) {
    let url = to_ws_url(&server_url, project_id, &api_key);
    let http = Client::new();

    while !shutdown.is_cancelled() {
        info!(project_id, "connecting tunnel");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connect_and_serve(&url, project_id, local_port, &http, &shutdown) => {
                if let Err(e) = result {
                    warn!(project_id, "tunnel connection ended: {e}");
                }
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    info!(project_id, "tunnel worker stopped");
}

async fn connect_and_serve(
    url: &str,
    project_id: u64,
    local_port: u16,
    http: &Client,
    shutdown: &CancellationToken,
) -> Result<(), String> {
    let (ws, _) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config()), false)
        .await
        .map_err(|e| e.to_string())?;
    let (mut sink, mut stream) = ws.split();

    match stream.next().await {
        Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
            Ok(Frame::Connected { url, .. }) => info!(project_id, tunnel_url = %url, "tunnel established"),
            Ok(Frame::Error { message }) => return Err(format!("handshake rejected: {message}")),
            _ => return Err("unexpected first frame".to_string()),
        },
        Some(Ok(_)) => return Err("unexpected non-text first frame".to_string()),
        Some(Err(e)) => return Err(e.to_string()),
        None => return Err("connection closed before handshake".to_string()),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) = handle_frame(&text, local_port, http).await {
                            if sink.send(Message::Text(response.to_json())).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.to_string()),
                }
            }
        }
    }
}

async fn handle_frame(text: &str, local_port: u16, http: &Client) -> Option<Frame> {
    let frame = match Frame::from_json(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("malformed frame from edge: {e}");
            return None;
        }
    };

    match frame {
        Frame::HttpRequest {
            request_id,
            method,
            path,
            query_string,
            headers,
            body,
        } => Some(
            forward(http, local_port, &request_id, &method, &path, &query_string, headers, &body).await,
        ),
        Frame::Ping | Frame::Pong => None,
        other => {
            warn!(?other, "unexpected frame type from edge");
            None
        }
    }
}

async fn forward(
    http: &Client,
    local_port: u16,
    request_id: &str,
    method: &str,
    path: &str,
    query_string: &str,
    headers: HashMap<String, String>,
    body: &str,
) -> Frame {
    let mut url = format!("http://localhost:{local_port}{path}");
    if !query_string.is_empty() {
        url.push('?');
        url.push_str(query_string);
    }

    let forward_headers = hop::retain_request_headers(headers);
    let method = match reqwest::Method::from_bytes(method.as_bytes()) {
        Ok(m) => m,
        Err(_) => return error_response(request_id, 400, "invalid HTTP method"),
    };

    let mut builder = http.request(method, &url).timeout(UPSTREAM_TIMEOUT);
    for (name, value) in &forward_headers {
        builder = builder.header(name, value);
    }
    if !body.is_empty() {
        builder = builder.body(body.as_bytes().to_vec());
    }

    match builder.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let resp_headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect();
            let bytes = resp.bytes().await.unwrap_or_default();
            let (body, is_binary) = encode_body(&bytes);
            Frame::HttpResponse {
                request_id: request_id.to_string(),
                status,
                headers: hop::retain_response_headers(resp_headers),
                body,
                is_binary,
            }
        }
        Err(e) if e.is_timeout() => error_response(request_id, 504, "upstream request timed out"),
        Err(e) => error_response(request_id, 502, &format!("error forwarding request: {e}")),
    }
}

fn error_response(request_id: &str, status: u16, message: &str) -> Frame {
    let (body, is_binary) = encode_body(message.as_bytes());
    Frame::HttpResponse {
        request_id: request_id.to_string(),
        status,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body,
        is_binary,
    }
}

/// Exposed for tests exercising the full decode/forward/encode path without
/// a real TCP listener.
#[cfg(test)]
pub(crate) async fn forward_for_test(
    http: &Client,
    local_port: u16,
    headers: HashMap<String, String>,
    body: &str,
) -> Frame {
    forward(http, local_port, "test-req", "GET", "/", "", headers, body).await
}
