//! Replication worker: mirrors peer change-events into the local store.
//!
//! Grounded on `workers/reader_pool.rs`'s pool-of-connections-plus-worker-
//! tasks-per-connection shape, generalized from a fixed reader list to
//! dynamically discovered peers pulled from the cluster index.

use crate::config::CacheClientConfig;
use crate::connection::Connection;
use crate::error::CacheError;
use crate::kv_client::CacheClient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vncache_auth::AuthManager;
use vncache_discovery::{ClusterIndex, NodeAdvertisement};
use vncache_local_cache::BlobCacheTable;
use vncache_wire::ChangeStatus;

/// Owns the worker's background discovery-and-connect loop. Dropping this
/// without calling `shutdown` leaves the background task running until
/// the crate-root facade's cancellation token fires.
pub struct ReplicationWorker {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ReplicationWorker {
    /// Spawn the worker. `local` is the same blob table the write-through
    /// overlay fronts, so replicated changes become immediately visible to
    /// local reads.
    #[must_use]
    pub fn spawn(
        config: Arc<CacheClientConfig>,
        auth: Arc<AuthManager>,
        local: Arc<BlobCacheTable>,
        cancel: CancellationToken,
    ) -> Self {
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(run(config, auth, local, task_cancel));
        Self { cancel, handle }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

type ConnectedSet = Arc<Mutex<HashSet<String>>>;

async fn run(config: Arc<CacheClientConfig>, auth: Arc<AuthManager>, local: Arc<BlobCacheTable>, cancel: CancellationToken) {
    let connected: ConnectedSet = Arc::new(Mutex::new(HashSet::new()));

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let index = ClusterIndex::shared();
        match index.known_nodes().await {
            Ok(known) => {
                launch_new_peers(&known, &config, &auth, &local, &connected, &cancel).await;
            }
            Err(e) => warn!(error = %e, "replication worker failed to read the cluster index"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(config.discovery_interval) => {}
        }
    }
}

async fn launch_new_peers(
    known: &[NodeAdvertisement],
    config: &Arc<CacheClientConfig>,
    auth: &Arc<AuthManager>,
    local: &Arc<BlobCacheTable>,
    connected: &ConnectedSet,
    cancel: &CancellationToken,
) {
    let mut guard = connected.lock().await;
    let slots = config.max_peer_connections.saturating_sub(guard.len());
    let candidates: Vec<NodeAdvertisement> = known
        .iter()
        .filter(|n| !guard.contains(&n.node_id))
        .take(slots)
        .cloned()
        .collect();

    for peer in candidates {
        guard.insert(peer.node_id.clone());
        let config = Arc::clone(config);
        let auth = Arc::clone(auth);
        let local = Arc::clone(local);
        let connected = Arc::clone(connected);
        let peer_cancel = cancel.child_token();
        tokio::spawn(async move {
            run_peer(peer, config, auth, local, connected, peer_cancel).await;
        });
    }
}

#[derive(serde::Serialize)]
struct PeerHandshakeClaims<'a> {
    node_id: &'a str,
}

async fn run_peer(
    peer: NodeAdvertisement,
    config: Arc<CacheClientConfig>,
    auth: Arc<AuthManager>,
    local: Arc<BlobCacheTable>,
    connected: ConnectedSet,
    cancel: CancellationToken,
) {
    let result = connect_peer(&peer, &config, &auth).await;
    let conn = match result {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            warn!(node_id = %peer.node_id, error = %e, "replication peer connect failed");
            detach_peer(&peer, &connected).await;
            return;
        }
    };

    info!(node_id = %peer.node_id, "replication worker connected to peer");

    let listener_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut listeners = Vec::with_capacity(listener_count);
    for _ in 0..listener_count {
        let conn = Arc::clone(&conn);
        let local = Arc::clone(&local);
        let cancel = cancel.clone();
        let request_timeout = config.request_timeout;
        listeners.push(tokio::spawn(async move {
            change_listener_loop(conn, local, request_timeout, cancel).await;
        }));
    }

    for listener in listeners {
        let _ = listener.await;
    }

    detach_peer(&peer, &connected).await;
}

async fn connect_peer(
    peer: &NodeAdvertisement,
    config: &CacheClientConfig,
    auth: &AuthManager,
) -> Result<Connection, CacheError> {
    let jwt = auth
        .sign_handshake(&PeerHandshakeClaims { node_id: &peer.node_id })
        .await?;
    let endpoint = peer.endpoint(config.use_tls);
    Connection::connect(peer.node_id.clone(), &endpoint, &jwt).await
}

async fn detach_peer(peer: &NodeAdvertisement, connected: &ConnectedSet) {
    connected.lock().await.remove(&peer.node_id);
    let index = ClusterIndex::shared();
    if let Err(e) = index.remove(&peer.node_id).await {
        warn!(node_id = %peer.node_id, error = %e, "failed to detach peer from cluster index after connection loss");
    }
}

/// One change-listener loop: repeatedly dequeues the next event on the
/// shared connection and applies it to the local store. Exits (dropping
/// its reference to `conn`) on transport failure or a `nf` dequeue status
/// — the latter means this connection's queue is misconfigured server
/// side, not that nothing is pending yet.
async fn change_listener_loop(
    conn: Arc<Connection>,
    local: Arc<BlobCacheTable>,
    request_timeout: std::time::Duration,
    cancel: CancellationToken,
) {
    let client = CacheClient::new(&conn, request_timeout);
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = client.wait_for_change(&cancel) => result,
        };

        match event {
            Ok(event) => apply_change(&client, &local, &event, &cancel).await,
            Err(CacheError::Cancelled) => return,
            Err(e) => {
                warn!(error = %e, "replication connection lost, exiting listener");
                return;
            }
        }
    }
}

async fn apply_change(
    client: &CacheClient<'_>,
    local: &BlobCacheTable,
    event: &crate::kv_client::ChangeEvent,
    cancel: &CancellationToken,
) {
    match event.status {
        ChangeStatus::NotFound => {
            error!("replication queue reported nf: server misconfigured, stopping this listener");
            cancel.cancel();
        }
        ChangeStatus::Deleted => {
            let Some(current_id) = &event.current_id else {
                warn!("deleted change event carried no current_id, ignoring");
                return;
            };
            if let Err(e) = local.delete(current_id) {
                warn!(key = %current_id, error = %e, "failed to apply replicated delete");
            }
        }
        ChangeStatus::Modified => {
            let Some(target) = event.new_id.as_ref().or(event.current_id.as_ref()) else {
                warn!("modified change event carried neither new_id nor current_id, ignoring");
                return;
            };
            match client.get(target, cancel).await {
                Ok(Some(bytes)) => {
                    if let Err(e) = local.add_or_update(target, None, &bytes, Instant::now()) {
                        warn!(key = %target, error = %e, "failed to apply replicated upsert");
                    }
                }
                Ok(None) => warn!(key = %target, "replicated object missing on remote"),
                Err(e) => warn!(key = %target, error = %e, "failed to fetch replicated object"),
            }
        }
    }
}
