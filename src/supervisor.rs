//! Connection supervisor: the single background task per `CacheClient`
//! that owns discovery, node selection, and connect/listen lifecycle.
//!
//! Grounded on `services/receiver/src/session.rs::run_session_loop`'s
//! `tokio::select! { biased; ... }` shape and its `watch::Receiver<bool>`
//! for shutdown — generalized here into a `watch::Sender<bool>` the
//! supervisor itself owns and drives for `IsConnected`, instead of just
//! consuming one.

use crate::config::CacheClientConfig;
use crate::connection::Connection;
use crate::error::CacheError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vncache_auth::AuthManager;
use vncache_discovery::ClusterIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Start,
    WaitDiscovery,
    PickNode,
    Connect,
    Listen,
    Disconnected,
    NoNodeDelay,
    /// The last discovery pass could not reach any configured well-known
    /// bootstrap peer at all (every fetch failed). Retries after the short
    /// `wellknown_backoff`, not the full `discovery_interval` and not
    /// `no_node_delay` — distinct from `NoNodeDelay`, which covers a
    /// *resolved* pass whose known-node set still came up empty at
    /// selection time.
    ShortBackoff,
}

/// Owns the supervisor's background task and exposes the two handles an
/// embedding application needs: the live `Connection` (once one exists)
/// and an `IsConnected` watch stream.
pub struct ConnectionSupervisor {
    is_connected_rx: watch::Receiver<bool>,
    connection_rx: watch::Receiver<Option<Arc<Connection>>>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ConnectionSupervisor {
    /// Spawn the supervisor loop. `auth` signs the handshake JWT presented
    /// on each `CONNECT`.
    #[must_use]
    pub fn spawn(config: Arc<CacheClientConfig>, auth: Arc<AuthManager>, cancel: CancellationToken) -> Self {
        let (is_connected_tx, is_connected_rx) = watch::channel(false);
        let (connection_tx, connection_rx) = watch::channel(None);

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(run(config, auth, is_connected_tx, connection_tx, task_cancel));

        Self {
            is_connected_rx,
            connection_rx,
            cancel,
            handle,
        }
    }

    /// Subscribe to the `IsConnected` flag: `true` only while the
    /// supervisor is in `LISTEN`.
    pub fn is_connected(&self) -> watch::Receiver<bool> {
        self.is_connected_rx.clone()
    }

    /// The current live connection, if the supervisor is in `LISTEN`.
    #[must_use]
    pub fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection_rx.borrow().clone()
    }

    /// Wait until the supervisor reports a connection (or the supervisor
    /// shuts down, in which case this returns `Cancelled`).
    pub async fn wait_for_connection(&mut self) -> Result<Arc<Connection>, CacheError> {
        loop {
            if let Some(conn) = self.connection_rx.borrow().clone() {
                return Ok(conn);
            }
            if self.connection_rx.changed().await.is_err() {
                return Err(CacheError::Cancelled);
            }
        }
    }

    /// Request shutdown and wait for the background task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run(
    config: Arc<CacheClientConfig>,
    auth: Arc<AuthManager>,
    is_connected_tx: watch::Sender<bool>,
    connection_tx: watch::Sender<Option<Arc<Connection>>>,
    cancel: CancellationToken,
) {
    let http = reqwest::Client::new();
    let mut state = SupervisorState::Start;

    loop {
        if cancel.is_cancelled() {
            info!("connection supervisor exiting: cancelled");
            return;
        }

        state = match state {
            SupervisorState::Start => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(config.initial_delay) => SupervisorState::WaitDiscovery,
                }
            }
            SupervisorState::WaitDiscovery => match run_discovery_pass(&config, &http).await {
                DiscoveryOutcome::Resolved => SupervisorState::PickNode,
                DiscoveryOutcome::AllUnreachable(e) => {
                    warn!(error = %e, "every well-known peer was unreachable this pass");
                    SupervisorState::ShortBackoff
                }
            },
            SupervisorState::PickNode => {
                let index = ClusterIndex::shared();
                match index.pick_random().await {
                    Ok(node) => {
                        info!(node_id = %node.node_id, "selected cache node");
                        match connect_and_listen(&node, &config, &auth, &is_connected_tx, &connection_tx, &cancel).await
                        {
                            Ok(()) => SupervisorState::Disconnected,
                            Err(CacheError::Cancelled) => return,
                            Err(e) => {
                                warn!(error = %e, node_id = %node.node_id, "connection attempt failed, recoverable");
                                tokio::select! {
                                    biased;
                                    () = cancel.cancelled() => return,
                                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                                }
                                SupervisorState::Disconnected
                            }
                        }
                    }
                    Err(_) => SupervisorState::NoNodeDelay,
                }
            }
            SupervisorState::NoNodeDelay => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(config.no_node_delay) => {}
                }
                SupervisorState::WaitDiscovery
            }
            SupervisorState::ShortBackoff => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(config.wellknown_backoff) => {}
                }
                SupervisorState::WaitDiscovery
            }
            SupervisorState::Connect | SupervisorState::Listen => {
                unreachable!("connect_and_listen owns these states internally")
            }
            SupervisorState::Disconnected => {
                is_connected_tx.send_replace(false);
                connection_tx.send_replace(None);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(config.wellknown_backoff) => {}
                }
                SupervisorState::WaitDiscovery
            }
        };
    }
}

/// Outcome of a single discovery pass over `config.initial_nodes`.
enum DiscoveryOutcome {
    /// At least one well-known peer answered; `ClusterIndex` was merged
    /// with whatever it advertised (possibly zero nodes).
    Resolved,
    /// Every configured well-known peer failed to respond. Warrants a
    /// short retry rather than waiting out a full `discovery_interval` or
    /// the `no_node_delay` used when a pass resolved but came up empty at
    /// node selection.
    AllUnreachable(CacheError),
}

async fn run_discovery_pass(config: &CacheClientConfig, http: &reqwest::Client) -> DiscoveryOutcome {
    let index = ClusterIndex::shared();
    let mut any_ok = false;
    let mut last_err = None;
    for seed in &config.initial_nodes {
        match vncache_discovery::fetch_bootstrap(http, seed, Duration::from_secs(5)).await {
            Ok(nodes) => {
                if let Err(e) = index.merge(nodes).await {
                    warn!(error = %e, seed = %seed, "failed to merge discovery response into cluster index");
                } else {
                    any_ok = true;
                }
            }
            Err(e) => {
                warn!(error = %e, seed = %seed, "well-known peer fetch failed");
                last_err = Some(e);
            }
        }
    }
    if any_ok {
        DiscoveryOutcome::Resolved
    } else {
        let message = last_err.map_or_else(|| "no well-known peers configured".to_owned(), |e| e.to_string());
        DiscoveryOutcome::AllUnreachable(CacheError::DiscoveryFailure(message))
    }
}

/// Drive `CONNECT` then `LISTEN` for one node. Returns `Ok(())` when the
/// connection drops normally (the caller loops back to `Disconnected`),
/// or `Err` for a recoverable connect failure / cancellation.
async fn connect_and_listen(
    node: &vncache_discovery::NodeAdvertisement,
    config: &CacheClientConfig,
    auth: &AuthManager,
    is_connected_tx: &watch::Sender<bool>,
    connection_tx: &watch::Sender<Option<Arc<Connection>>>,
    cancel: &CancellationToken,
) -> Result<(), CacheError> {
    #[derive(serde::Serialize)]
    struct HandshakeClaims<'a> {
        node_id: &'a str,
    }

    let jwt = auth.sign_handshake(&HandshakeClaims { node_id: &node.node_id }).await?;
    let endpoint = node.endpoint(config.use_tls);

    let conn = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(CacheError::Cancelled),
        result = Connection::connect(node.node_id.clone(), &endpoint, &jwt) => result?,
    };

    let conn = Arc::new(conn);
    connection_tx.send_replace(Some(Arc::clone(&conn)));
    is_connected_tx.send_replace(true);
    info!(node_id = %node.node_id, "entered LISTEN");

    // LISTEN holds until cancellation or `conn` flags itself broken after a
    // fatal transport error on some caller's request. Polled rather than
    // pushed since nothing else here is driving the connection's I/O.
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                connection_tx.send_replace(None);
                is_connected_tx.send_replace(false);
                return Err(CacheError::Cancelled);
            }
            () = tokio::time::sleep(BROKEN_CONNECTION_POLL_INTERVAL) => {
                if conn.is_broken() {
                    warn!(node_id = %node.node_id, "connection observed broken, leaving LISTEN");
                    connection_tx.send_replace(None);
                    is_connected_tx.send_replace(false);
                    return Ok(());
                }
            }
        }
    }
}

const BROKEN_CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(200);
