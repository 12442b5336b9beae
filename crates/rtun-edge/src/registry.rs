//! Tunnel registry (C4): subdomain → live control channel, and
//! request-id → pending awaiter. The authoritative in-process state the
//! rest of the edge is built around (§4.4, §5).

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rtun_core::models::Id;
use rtun_protocol::Frame;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

#[derive(Clone)]
pub struct TunnelHandle {
    pub project_id: Id,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

struct PendingEntry {
    subdomain: String,
    created_at: Instant,
    tx: oneshot::Sender<Frame>,
}

#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: DashMap<String, TunnelHandle>,
    tunnel_to_project: DashMap<String, Id>,
    pending: DashMap<String, PendingEntry>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `subdomain` is already occupied (invariant 1, §8): the
    /// existing tunnel is left untouched.
    pub fn register(&self, subdomain: &str, project_id: Id, outbound: mpsc::UnboundedSender<Frame>) -> bool {
        if self.tunnels.contains_key(subdomain) {
            return false;
        }
        self.tunnels.insert(
            subdomain.to_string(),
            TunnelHandle {
                project_id,
                outbound,
            },
        );
        self.tunnel_to_project
            .insert(subdomain.to_string(), project_id);
        info!(subdomain, project_id, "tunnel registered");
        true
    }

    /// Removes the tunnel and fails every awaiter still pending for it
    /// immediately, rather than letting them time out (§4.4's preferred
    /// behavior, made unconditional here).
    pub fn deregister(&self, subdomain: &str) {
        self.tunnels.remove(subdomain);
        self.tunnel_to_project.remove(subdomain);
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.subdomain == subdomain)
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            // Dropping the sender resolves the awaiter's receiver with an
            // error immediately instead of waiting for REQUEST_TIMEOUT.
            self.pending.remove(&id);
        }
        info!(subdomain, "tunnel deregistered");
    }

    pub fn lookup(&self, subdomain: &str) -> Option<TunnelHandle> {
        self.tunnels.get(subdomain).map(|t| t.clone())
    }

    pub fn project_for(&self, subdomain: &str) -> Option<Id> {
        self.tunnel_to_project.get(subdomain).map(|p| *p)
    }

    /// Register an awaiter for `request_id`, scoped to the tunnel that will
    /// serve it (so a tunnel close fails it fast).
    pub fn await_response(&self, request_id: &str, subdomain: &str) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.to_string(),
            PendingEntry {
                subdomain: subdomain.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        rx
    }

    /// Remove the awaiter unconditionally; used by the ingress router's
    /// scoped-cleanup guard regardless of how the wait ended.
    pub fn forget(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    /// Deliver a response frame to its awaiter. Responses for unknown ids
    /// are dropped with a warning (invariant 2, §8).
    pub fn resolve(&self, request_id: &str, frame: Frame) {
        match self.pending.remove(request_id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(frame);
            }
            None => {
                warn!(request_id, "response for unknown or already-resolved request id");
            }
        }
    }

    /// Evict awaiters older than `max_age` (§4.5's cleanup sweeper,
    /// backstopping crashed control channels that never send a response).
    pub fn sweep_pending(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|e| now.duration_since(e.created_at) > max_age)
            .map(|e| e.key().clone())
            .collect();
        let count = stale.len();
        for id in stale {
            self.pending.remove(&id);
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_registration_on_same_subdomain_fails() {
        let registry = TunnelRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(registry.register("demo", 1, tx.clone()));
        assert!(!registry.register("demo", 2, tx));
        assert_eq!(registry.project_for("demo"), Some(1));
    }

    #[tokio::test]
    async fn resolve_delivers_to_correct_awaiter() {
        let registry = TunnelRegistry::new();
        let rx = registry.await_response("req-1", "demo");
        registry.resolve(
            "req-1",
            Frame::HttpResponse {
                request_id: "req-1".into(),
                status: 200,
                headers: vec![],
                body: "ok".into(),
                is_binary: false,
            },
        );
        let frame = rx.await.unwrap();
        match frame {
            Frame::HttpResponse { request_id, .. } => assert_eq!(request_id, "req-1"),
            _ => panic!("wrong frame"),
        }
    }

    #[tokio::test]
    async fn resolve_for_unknown_id_is_dropped_silently() {
        let registry = TunnelRegistry::new();
        // no awaiter registered
        registry.resolve(
            "ghost",
            Frame::HttpResponse {
                request_id: "ghost".into(),
                status: 200,
                headers: vec![],
                body: "".into(),
                is_binary: false,
            },
        );
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn deregister_fails_pending_awaiters_immediately() {
        let registry = TunnelRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("demo", 1, tx);
        let rx = registry.await_response("req-1", "demo");
        registry.deregister("demo");
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale_entries() {
        let registry = TunnelRegistry::new();
        let _rx1 = registry.await_response("old", "demo");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _rx2 = registry.await_response("fresh", "demo");
        let evicted = registry.sweep_pending(Duration::from_millis(10));
        assert_eq!(evicted, 1);
        assert_eq!(registry.pending_len(), 1);
    }
}
