//! Write-through overlay: combines the key-value client with the local
//! blob cache table behind a single correctness invariant — a local write
//! only ever becomes visible after the matching remote write has already
//! succeeded.
//!
//! Grounded on `workers/client_pool.rs`'s pattern of a thin struct owning
//! both a remote handle and a local data structure, exposing one API
//! surface that sequences between them rather than letting callers touch
//! either tier directly.

use crate::connection::Connection;
use crate::error::CacheError;
use crate::kv_client::CacheClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use vncache_local_cache::BlobCacheTable;

/// A local-cache-fronted view of a single remote connection. Constructed
/// once per `CacheClient` instance; the overlay does not own reconnection,
/// it is simply handed whatever `Connection` the supervisor currently
/// reports.
///
/// `local` is shared (not owned) so the replication worker, which writes
/// directly into the same table, and this overlay's reads observe the
/// same entries.
pub struct CacheOverlay {
    local: Arc<BlobCacheTable>,
    max_age: Duration,
}

impl CacheOverlay {
    #[must_use]
    pub fn new(local: Arc<BlobCacheTable>, max_age: Duration) -> Self {
        Self { local, max_age }
    }

    /// Read-through: consult the local bucket first; on a miss, fetch from
    /// the remote node into a staging buffer, stage it into the local
    /// bucket, then hand the caller its own copy.
    #[instrument(skip(self, conn, cancel), fields(key = %key))]
    pub async fn get(
        &self,
        conn: &Connection,
        key: &str,
        request_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(cached) = self.local.get(key, |bytes, _stored_at| bytes.to_vec())? {
            debug!(key = %key, "local cache hit");
            return Ok(Some(cached));
        }

        let client = CacheClient::new(conn, request_timeout);
        let Some(fetched) = client.get(key, cancel).await? else {
            return Ok(None);
        };

        if !fetched.is_empty() {
            self.local.add_or_update(key, None, &fetched, Instant::now())?;
        }
        Ok(Some(fetched))
    }

    /// Write-through: remote first. Only on `ok` do we update the local
    /// bucket (at `new_key` if a rename was requested). On any remote
    /// failure, any existing local copy of `key` is dropped so a stale
    /// entry never outlives the remote object it mirrors, then the error
    /// propagates.
    #[instrument(skip(self, conn, data, cancel), fields(key = %key))]
    pub async fn add_or_update(
        &self,
        conn: &Connection,
        key: &str,
        new_key: Option<&str>,
        data: &[u8],
        max_object_size: usize,
        request_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let client = CacheClient::new(conn, request_timeout);
        if let Err(e) = client.add_or_update(key, new_key, data, max_object_size, cancel).await {
            if let Err(local_err) = self.local.delete(key) {
                warn!(key = %key, error = %local_err, "failed to drop stale local copy after remote write failure");
            }
            return Err(e);
        }

        let target = new_key.unwrap_or(key);
        self.local.add_or_update(target, None, data, Instant::now())?;
        if new_key.is_some_and(|nk| nk != key) {
            self.local.delete(key)?;
        }
        Ok(())
    }

    /// Issue the remote and local deletes concurrently; the overall
    /// outcome reported to the caller is the remote outcome regardless of
    /// what the local tier reports (a local miss after a remote hit is not
    /// an error — it just means the key was never staged locally).
    #[instrument(skip(self, conn, cancel), fields(key = %key))]
    pub async fn delete(
        &self,
        conn: &Connection,
        key: &str,
        request_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, CacheError> {
        let client = CacheClient::new(conn, request_timeout);
        let (remote, local) = tokio::join!(client.delete(key, cancel), async { self.local.delete(key) });
        if let Err(e) = local {
            warn!(key = %key, error = %e, "local delete failed alongside remote delete");
        }
        remote
    }

    /// Run the periodic prune sweep once. The caller (the crate-root
    /// facade) drives this on a `tokio::time::interval` gated by
    /// `refresh_interval` — a zero interval means the caller simply never
    /// schedules this.
    pub fn prune(&self, now: Instant) -> usize {
        self.local.prune(now, self.max_age)
    }

    #[must_use]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
