//! Public HTTP ingress router (C6, §4.6): resolves the tunnel for a public
//! request, enforces rate limiting and the firewall, multiplexes the
//! request onto the control channel, and reassembles the response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use rtun_core::firewall::{Decision, FirewallEvaluator};
use rtun_core::subdomain::{self, HostResolution};
use rtun_protocol::{decode_body, encode_body, generate_request_id, headers as hop, Frame};
use tracing::warn;

use crate::state::EdgeState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(v) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        return v.trim().to_string();
    }
    if let Some(v) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = v.split(',').next() {
            return first.trim().to_string();
        }
    }
    peer.ip().to_string()
}

/// Drop on every exit path so an awaiter never outlives a single request,
/// regardless of which branch returns (§4.6 step 9's scoped-cleanup rule).
struct AwaiterGuard<'a> {
    registry: &'a crate::registry::TunnelRegistry,
    request_id: String,
}

impl Drop for AwaiterGuard<'_> {
    fn drop(&mut self) {
        self.registry.forget(&self.request_id);
    }
}

pub async fn ingress_handler(
    State(state): State<Arc<EdgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let headers = req.headers().clone();
    let ip = client_ip(&headers, peer);

    let parsed_ip: std::net::IpAddr = ip.parse().unwrap_or(peer.ip());
    if !state.rate_limiter.check(parsed_ip) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let subdomain = match subdomain::extract(host, &state.settings.edge.domain) {
        HostResolution::Root => {
            return (StatusCode::OK, "rtun edge: no subdomain requested").into_response();
        }
        HostResolution::Invalid => return (StatusCode::NOT_FOUND, "not found").into_response(),
        HostResolution::Subdomain(s) => s,
    };

    let tunnel = match state.registry.lookup(&subdomain) {
        Some(t) => t,
        None => {
            return match state.store.get_project_by_subdomain(&subdomain).await {
                Some(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("tunnel is not active for {subdomain}.{}", state.settings.edge.domain),
                )
                    .into_response(),
                None => (
                    StatusCode::NOT_FOUND,
                    format!("Tunnel not found: {subdomain}.{}", state.settings.edge.domain),
                )
                    .into_response(),
            };
        }
    };

    let project = match state.store.get_project(tunnel.project_id).await {
        Some(p) => p,
        None => return (StatusCode::NOT_FOUND, "project not found").into_response(),
    };

    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query_string = req.uri().query().unwrap_or("").to_string();

    let evaluator = FirewallEvaluator::new(state.store.as_ref(), &state.rule_cache);
    let decision = evaluator
        .evaluate(project.id, project.firewall_enabled, &method, &path, Some(&ip))
        .await;

    if let Decision::Block { reason, .. } = decision {
        let mut response = (StatusCode::FORBIDDEN, reason.clone()).into_response();
        let resp_headers = response.headers_mut();
        resp_headers.insert("X-Firewall-Blocked", HeaderValue::from_static("true"));
        if let Ok(v) = HeaderValue::from_str(&reason) {
            resp_headers.insert("X-Firewall-Reason", v);
        }
        resp_headers.insert("X-Firewall-Request-Logged", HeaderValue::from_static("true"));
        return response;
    }

    let body_bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read body: {e}")).into_response();
        }
    };
    let (body, _) = encode_body(&body_bytes);

    let mut header_map = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let header_map: HashMap<String, String> = hop::retain_request_headers(header_map)
        .into_iter()
        .collect();

    let request_id = generate_request_id();
    let guard = AwaiterGuard {
        registry: &state.registry,
        request_id: request_id.clone(),
    };
    let rx = state.registry.await_response(&request_id, &subdomain);

    let frame = Frame::HttpRequest {
        request_id: request_id.clone(),
        method,
        path,
        query_string,
        headers: header_map,
        body,
    };

    let send_timeout = Duration::from_secs_f64(state.settings.edge.send_timeout_secs);
    let send_result = tokio::time::timeout(send_timeout, async {
        tunnel.outbound.send(frame)
    })
    .await;
    match send_result {
        Err(_) => {
            drop(guard);
            return (StatusCode::GATEWAY_TIMEOUT, "Tunnel send timeout").into_response();
        }
        Ok(Err(_)) => {
            drop(guard);
            return (StatusCode::BAD_GATEWAY, "tunnel is no longer connected").into_response();
        }
        Ok(Ok(())) => {}
    }

    let wait_timeout = Duration::from_secs_f64(state.settings.edge.request_timeout_secs);
    let outcome = tokio::time::timeout(wait_timeout, rx).await;
    drop(guard);

    match outcome {
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "Tunnel timeout").into_response(),
        Ok(Err(_)) => (StatusCode::BAD_GATEWAY, "No response from tunnel").into_response(),
        Ok(Ok(Frame::HttpResponse {
            status,
            headers: resp_headers,
            body,
            is_binary,
            ..
        })) => build_response(status, resp_headers, &body, is_binary),
        Ok(Ok(_)) => {
            warn!("unexpected frame type delivered to an http_request awaiter");
            (StatusCode::BAD_GATEWAY, "malformed tunnel response").into_response()
        }
    }
}

fn build_response(status: u16, headers: Vec<(String, String)>, body: &str, is_binary: bool) -> Response {
    let bytes = match decode_body(body, is_binary) {
        Ok(b) => b,
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("invalid response body encoding: {e}")).into_response();
        }
    };

    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status_code);
    {
        let resp_headers = response.headers_mut().unwrap();
        for (name, value) in hop::retain_response_headers(headers) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                resp_headers.append(name, value);
            }
        }
    }
    response.body(Body::from(bytes)).unwrap()
}
