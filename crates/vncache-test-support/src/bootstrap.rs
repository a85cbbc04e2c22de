//! A mock bootstrap HTTP endpoint for discovery tests: serves
//! `/.well-known/vncache` as a JSON array of `NodeAdvertisement`, the
//! document shape `vncache_discovery::fetch_bootstrap` expects.
//!
//! Grounded on the corpus's `axum`-based HTTP servers (`services/server`)
//! for "stand up a tiny real HTTP server on a random port" in tests.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vncache_discovery::NodeAdvertisement;

struct BootstrapState {
    nodes: Vec<NodeAdvertisement>,
    requests: AtomicUsize,
    /// When set, every request is answered with `503` instead of the node
    /// list, to simulate a well-known peer that is configured but never
    /// resolves.
    unreachable: AtomicBool,
}

/// A standalone bootstrap server seeded with a fixed node list, bound to
/// `127.0.0.1:0`.
pub struct MockBootstrapServer {
    addr: SocketAddr,
    state: Arc<BootstrapState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockBootstrapServer {
    pub async fn start(nodes: Vec<NodeAdvertisement>) -> Self {
        let state = Arc::new(BootstrapState {
            nodes,
            requests: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        });
        let app = Router::new()
            .route("/.well-known/vncache", get(well_known))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock bootstrap server");
        let addr = listener.local_addr().expect("mock bootstrap server local_addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, _task: task }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of `/.well-known/vncache` requests served so far, for tests
    /// that need to observe a supervisor's discovery retry cadence.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Answer every subsequent request with `503` instead of the node
    /// list, without tearing down the listener (requests still count).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

async fn well_known(State(state): State<Arc<BootstrapState>>) -> axum::response::Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.unreachable.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(state.nodes.clone()).into_response()
}
