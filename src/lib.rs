//! Client for a distributed object-cache cluster: a single authenticated
//! WebSocket connection to a cluster of cache nodes, cluster discovery,
//! a two-tier write-through local cache, and a background replication
//! worker mirroring peer change-events.
//!
//! [`VncacheClient`] is the facade an embedding application constructs and
//! drives; the individual components (`kv_client`, `overlay`,
//! `supervisor`, `replication`) are public so an application that needs
//! finer control can wire them up itself.

pub mod config;
pub mod connection;
pub mod error;
pub mod kv_client;
pub mod overlay;
pub mod replication;
pub mod supervisor;

pub use config::{CacheClientConfig, ConfigError};
pub use error::CacheError;
pub use kv_client::{CacheClient, ChangeEvent, ChecksumValidity};
pub use overlay::CacheOverlay;
pub use replication::ReplicationWorker;
pub use supervisor::ConnectionSupervisor;

use connection::Connection;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vncache_auth::AuthManager;
use vncache_local_cache::{BlobCacheTable, TableConfig};

/// Point-in-time view of the supervisor's connection state, for an
/// embedding application that wants to log or expose it without holding a
/// `watch::Receiver` itself. Replaces the metrics export this crate
/// deliberately does not carry (see the Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub connected: bool,
}

/// The facade an embedding application builds: owns the connection
/// supervisor, the write-through overlay, and (unless `memory_only`) the
/// replication worker, and exposes the key-value operations against
/// whichever connection the supervisor currently reports.
pub struct VncacheClient {
    config: Arc<CacheClientConfig>,
    supervisor: ConnectionSupervisor,
    overlay: Arc<CacheOverlay>,
    local: Arc<BlobCacheTable>,
    replication: Option<ReplicationWorker>,
    refresh_handle: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl VncacheClient {
    /// Validate `config`, then start the supervisor (and, unless
    /// `memory_only`, the replication worker and the local-cache refresh
    /// loop).
    pub fn start(config: CacheClientConfig, auth: AuthManager) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let auth = Arc::new(auth);
        let cancel = CancellationToken::new();

        let local = Arc::new(BlobCacheTable::new(TableConfig {
            table_size: config.buckets,
            bucket_size: config.bucket_size,
            zero_all: config.zero_all,
        }));
        let overlay = Arc::new(CacheOverlay::new(Arc::clone(&local), config.max_age));

        let supervisor = ConnectionSupervisor::spawn(Arc::clone(&config), Arc::clone(&auth), cancel.clone());

        let replication = if config.memory_only {
            None
        } else {
            Some(ReplicationWorker::spawn(
                Arc::clone(&config),
                Arc::clone(&auth),
                Arc::clone(&local),
                cancel.clone(),
            ))
        };

        let refresh_handle = if config.refresh_interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(run_refresh_loop(
                Arc::clone(&overlay),
                config.refresh_interval,
                cancel.clone(),
            )))
        };

        info!(memory_only = config.memory_only, "vncache client started");

        Ok(Self {
            config,
            supervisor,
            overlay,
            local,
            replication,
            refresh_handle,
            cancel,
        })
    }

    /// Subscribe to the supervisor's `IsConnected` flag.
    #[must_use]
    pub fn is_connected(&self) -> watch::Receiver<bool> {
        self.supervisor.is_connected()
    }

    /// Point-in-time connection status snapshot.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            connected: self.supervisor.current_connection().is_some(),
        }
    }

    async fn connection(&mut self) -> Result<Arc<Connection>, CacheError> {
        self.supervisor.wait_for_connection().await
    }

    /// Read-through `get`: local cache first, remote on miss. In
    /// `memory_only` mode the remote tier is never consulted — the local
    /// table is the entire cache, per the `memory_only` config field's
    /// "skip remote backing" contract.
    pub async fn get(&mut self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, CacheError> {
        if self.config.memory_only {
            return Ok(self.local.get(key, |bytes, _stored_at| bytes.to_vec())?);
        }
        let conn = self.connection().await?;
        self.overlay.get(&conn, key, self.config.request_timeout, cancel).await
    }

    /// Write-through `add_or_update`: remote first, then local. In
    /// `memory_only` mode, writes go straight to the local table.
    pub async fn add_or_update(
        &mut self,
        key: &str,
        new_key: Option<&str>,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        if data.len() > self.config.max_object_size {
            return Err(CacheError::MessageTooLarge {
                actual: data.len(),
                max: self.config.max_object_size,
            });
        }
        if self.config.memory_only {
            self.local.add_or_update(key, new_key, data, Instant::now())?;
            return Ok(());
        }
        let conn = self.connection().await?;
        self.overlay
            .add_or_update(&conn, key, new_key, data, self.config.max_object_size, self.config.request_timeout, cancel)
            .await
    }

    /// Concurrent remote+local delete; the remote outcome is returned. In
    /// `memory_only` mode, only the local table is consulted.
    pub async fn delete(&mut self, key: &str, cancel: &CancellationToken) -> Result<bool, CacheError> {
        if self.config.memory_only {
            return Ok(self.local.delete(key)?);
        }
        let conn = self.connection().await?;
        self.overlay.delete(&conn, key, self.config.request_timeout, cancel).await
    }

    /// Current number of entries staged in the local cache.
    #[must_use]
    pub fn local_cache_len(&self) -> usize {
        self.local.len()
    }

    /// Whether `key` currently has a staged entry in the local cache,
    /// without touching the remote tier. Useful for observing the
    /// write-through invariant and replicated deletes directly.
    #[must_use]
    pub fn local_contains(&self, key: &str) -> bool {
        self.local.get(key, |_bytes, _stored_at| ()).ok().flatten().is_some()
    }

    /// Cancel every background task (supervisor, replication worker,
    /// refresh loop) and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.refresh_handle.take() {
            let _ = handle.await;
        }
        if let Some(worker) = self.replication.take() {
            worker.shutdown().await;
        }
        self.supervisor.shutdown().await;
    }
}

async fn run_refresh_loop(overlay: Arc<CacheOverlay>, refresh_interval: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(refresh_interval);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                overlay.prune(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_status_is_plain_copy_debug_data() {
        let status = SupervisorStatus { connected: true };
        assert_eq!(format!("{status:?}"), "SupervisorStatus { connected: true }");
    }
}
