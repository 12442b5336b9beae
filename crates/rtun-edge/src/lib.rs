pub mod auth;
pub mod control;
pub mod ingress;
pub mod rate_limit;
pub mod registry;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use rtun_core::config::Settings;
use rtun_core::store::SharedStore;
use state::EdgeState;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

pub fn build_router(state: Arc<EdgeState>) -> Router {
    let api_router = Router::new()
        .merge(routes::health::router())
        .merge(routes::agent::router())
        .merge(routes::firewall::router());

    let control_router: Router<Arc<EdgeState>> =
        Router::new().route("/_tunnel", get(control::ws_handler));

    Router::new()
        .merge(api_router)
        .merge(control_router)
        .fallback(ingress::ingress_handler)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Cancels the sweepers when `shutdown` fires (§5's sweeper-cancellation
/// requirement on edge shutdown).
pub fn spawn_sweepers(state: Arc<EdgeState>, shutdown: CancellationToken) {
    let pending_max_age = Duration::from_secs_f64(state.settings.edge.request_timeout_secs * 2.0);
    let sweep_state = state.clone();
    let sweep_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = sweep_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sweep_state.registry.sweep_pending(pending_max_age);
                    if evicted > 0 {
                        info!(evicted, "swept stale pending requests");
                    }
                }
            }
        }
    });

    let rl_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    rl_state.rate_limiter.sweep();
                }
            }
        }
    });
}

pub fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.ok();
        };
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        shutdown.cancel();
    });
}

pub async fn serve(settings: Settings, store: SharedStore, shutdown: CancellationToken) -> color_eyre::Result<()> {
    let state = EdgeState::new(settings, store);
    spawn_sweepers(state.clone(), shutdown.clone());

    let router = build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", state.settings.edge.host, state.settings.edge.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, domain = state.settings.edge.domain, "rtun edge listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    Ok(())
}
