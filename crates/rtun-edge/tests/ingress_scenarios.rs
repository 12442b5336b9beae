//! End-to-end scenarios from §8 of the spec, driven through the full axum
//! router via `tower::ServiceExt::oneshot` rather than against individual
//! handlers, so the rate limiter / firewall / registry / ingress wiring in
//! `build_router` is exercised exactly as the edge assembles it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rtun_core::config::Settings;
use rtun_core::firewall::access_request;
use rtun_core::models::{Project, RuleType};
use rtun_core::store::{InMemoryStore, Store};
use rtun_edge::build_router;
use rtun_edge::state::EdgeState;
use rtun_protocol::Frame;
use tower::ServiceExt;

const PEER: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 7)), 54321);

fn settings() -> Settings {
    let mut s = Settings::default();
    s.edge.domain = "ex.com".to_string();
    s
}

fn request(host: &str, path: &str) -> Request<Body> {
    let mut req = Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(PEER));
    req
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

/// S1: a registered tunnel with an agent echoing back 200 "hello" serves the
/// public request end to end.
#[tokio::test]
async fn s1_happy_path_round_trips_through_a_live_tunnel() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_project(Project {
        id: 1,
        subdomain: Some("demo-alice".into()),
        firewall_enabled: false,
        ..Default::default()
    });
    let state = EdgeState::new(settings(), store);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state.registry.register("demo-alice", 1, tx);

    let agent_state = state.clone();
    tokio::spawn(async move {
        if let Some(Frame::HttpRequest { request_id, .. }) = rx.recv().await {
            agent_state.registry.resolve(
                &request_id,
                Frame::HttpResponse {
                    request_id,
                    status: 200,
                    headers: vec![],
                    body: "hello".into(),
                    is_binary: false,
                },
            );
        }
    });

    let router = build_router(state);
    let resp = router.oneshot(request("demo-alice.ex.com", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "hello");
}

/// S2: a project exists for the subdomain but no tunnel is registered.
#[tokio::test]
async fn s2_project_without_live_tunnel_returns_503() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_project(Project {
        id: 2,
        subdomain: Some("pending-x".into()),
        ..Default::default()
    });
    let state = EdgeState::new(settings(), store);
    let router = build_router(state);

    let resp = router.oneshot(request("pending-x.ex.com", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_text(resp).await.contains("tunnel is not active"));
}

/// S3: no project and no tunnel for the subdomain at all.
#[tokio::test]
async fn s3_unknown_subdomain_returns_404() {
    let state = EdgeState::new(settings(), Arc::new(InMemoryStore::new()));
    let router = build_router(state);

    let resp = router.oneshot(request("nope.ex.com", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_text(resp).await.contains("Tunnel not found: nope.ex.com"));
}

/// S4: a path rule blocks the request, headers are annotated, and an access
/// request is logged.
#[tokio::test]
async fn s4_firewall_blocks_and_logs_an_access_request() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_project(Project {
        id: 4,
        subdomain: Some("blocked".into()),
        firewall_enabled: true,
        ..Default::default()
    });
    store
        .insert_firewall_rule(4, RuleType::Path, "/admin".into(), None)
        .await
        .unwrap();
    let state = EdgeState::new(settings(), store.clone());
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    state.registry.register("blocked", 4, tx);

    let router = build_router(state);
    let resp = router
        .oneshot(request("blocked.ex.com", "/admin/panel"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Firewall-Blocked").unwrap(), "true");

    let requests = store.access_requests(4, None).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/admin/panel");
}

/// S5: after a block, approving the logged access request lets the exact
/// same `(project, ip, method, path)` tuple through, while a different path
/// from the same IP stays blocked.
#[tokio::test]
async fn s5_approval_bypasses_the_firewall_for_the_exact_tuple_only() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_project(Project {
        id: 5,
        subdomain: Some("secure".into()),
        firewall_enabled: true,
        ..Default::default()
    });
    store
        .insert_firewall_rule(5, RuleType::Path, "/admin".into(), None)
        .await
        .unwrap();
    let state = EdgeState::new(settings(), store.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state.registry.register("secure", 5, tx);
    let agent_state = state.clone();
    tokio::spawn(async move {
        while let Some(Frame::HttpRequest { request_id, .. }) = rx.recv().await {
            agent_state.registry.resolve(
                &request_id,
                Frame::HttpResponse {
                    request_id,
                    status: 200,
                    headers: vec![],
                    body: "ok".into(),
                    is_binary: false,
                },
            );
        }
    });

    let router = build_router(state);

    let blocked = router
        .clone()
        .oneshot(request("secure.ex.com", "/admin/panel"))
        .await
        .unwrap();
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

    let logged = store.access_requests(5, None).await;
    assert_eq!(logged.len(), 1);
    access_request::approve(store.as_ref(), logged[0].id, 5)
        .await
        .unwrap();

    let allowed = router
        .clone()
        .oneshot(request("secure.ex.com", "/admin/panel"))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(body_text(allowed).await, "ok");

    let still_blocked = router
        .oneshot(request("secure.ex.com", "/admin/other"))
        .await
        .unwrap();
    assert_eq!(still_blocked.status(), StatusCode::FORBIDDEN);
}

/// S6: the agent receives the request but never answers. Ingress must not
/// hang past `request_timeout_secs`, must return 504, and must not leak the
/// awaiter into the pending table.
#[tokio::test]
async fn s6_silent_agent_times_out_with_504_and_cleans_up_the_awaiter() {
    let mut cfg = settings();
    cfg.edge.request_timeout_secs = 0.05;
    let store = Arc::new(InMemoryStore::new());
    store.seed_project(Project {
        id: 6,
        subdomain: Some("slow".into()),
        firewall_enabled: false,
        ..Default::default()
    });
    let state = EdgeState::new(cfg, store);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state.registry.register("slow", 6, tx);
    // Simulate an agent that reads the request off the socket but never
    // sends back an `http_response` frame.
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let registry_check = state.clone();
    let router = build_router(state);
    let resp = router.oneshot(request("slow.ex.com", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(registry_check.registry.pending_len(), 0);
}

/// S7: the 101st request within the sliding window is rejected before ever
/// reaching the tunnel (rate limiter sits ahead of subdomain resolution).
#[tokio::test]
async fn s7_rate_limit_rejects_the_101st_request() {
    let mut cfg = settings();
    cfg.edge.rate_limit_max = 5;
    let state = EdgeState::new(cfg, Arc::new(InMemoryStore::new()));
    let router = build_router(state);

    for _ in 0..5 {
        let resp = router
            .clone()
            .oneshot(request("nope.ex.com", "/"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
    let resp = router.oneshot(request("nope.ex.com", "/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}
