//! Key-value client API: the request/response vocabulary a caller drives
//! directly, built on top of `connection::Connection`.
//!
//! Grounded on `uplink.rs::send_batch`'s request/await-response shape, but
//! generalized from one hardcoded message type to the cache protocol's
//! four actions (`g`/`u`/`d`/`dq`), and on `vncache-codec::Serializer` for
//! pluggable body encoding (JSON by default, any `Serializer<T>` impl
//! otherwise).

use crate::connection::Connection;
use crate::error::CacheError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use vncache_codec::{JsonCodec, Serializer};
use vncache_wire::{checksum_base32, verify_checksum, Action, ChangeStatus, ChecksumType, Frame, HeaderTag, Status};

/// Drives request/response exchanges against a single connected cache
/// node. Does not itself own reconnection — that's the supervisor's job;
/// a `CacheClient` is handed a fresh `Connection` each time one becomes
/// available.
pub struct CacheClient<'a> {
    conn: &'a Connection,
    request_timeout: Duration,
}

impl<'a> CacheClient<'a> {
    #[must_use]
    pub fn new(conn: &'a Connection, request_timeout: Duration) -> Self {
        Self { conn, request_timeout }
    }

    /// Store `data` under `key`, optionally renaming from `key` to
    /// `new_key` in the same call (the node treats a present `NewObjectId`
    /// header as "delete request.key, store at new_key").
    ///
    /// `nf` here means the rename target's source key did not exist on the
    /// node and is surfaced as [`CacheError::ObjectNotFound`] — unlike
    /// `get`/`delete`, where `nf` is not an error for upsert it is fatal to
    /// the call.
    #[instrument(skip(self, data, cancel), fields(key = %key))]
    pub async fn add_or_update(
        &self,
        key: &str,
        new_key: Option<&str>,
        data: &[u8],
        max_object_size: usize,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        if data.len() > max_object_size {
            return Err(CacheError::MessageTooLarge { actual: data.len(), max: max_object_size });
        }
        let checksum = checksum_base32(data);
        let mut request = self.conn.rent().await;
        request.set_action(Action::Update);
        request.set_header(HeaderTag::ObjectId, key.as_bytes().to_vec());
        if let Some(new_key) = new_key {
            request.set_header(HeaderTag::NewObjectId, new_key.as_bytes().to_vec());
        }
        request.set_header(HeaderTag::ChecksumType, ChecksumType::Fnv1a.as_str().as_bytes().to_vec());
        request.set_header(HeaderTag::ChecksumValue, checksum.into_bytes());
        request.set_body(data.to_vec());

        let response = request.send(self.request_timeout, cancel).await?;
        match response.status() {
            Some(Status::Ok) => Ok(()),
            Some(Status::ChecksumMismatch) => Err(CacheError::InvalidChecksum),
            Some(Status::NotFound) => Err(CacheError::ObjectNotFound),
            Some(Status::Error) | None => Err(CacheError::InvalidStatus(
                response.header_str(HeaderTag::Status).unwrap_or("<missing>").to_owned(),
            )),
        }
    }

    /// `add_or_update` for any `T: Serialize` via the default JSON codec.
    pub async fn add_or_update_with<T: serde::Serialize>(
        &self,
        key: &str,
        new_key: Option<&str>,
        value: &T,
        max_object_size: usize,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let codec = JsonCodec;
        let mut bytes: Vec<u8> = Vec::new();
        codec.serialize(value, &mut bytes)?;
        self.add_or_update(key, new_key, &bytes, max_object_size, cancel).await
    }

    /// Fetch the raw bytes stored at `key`, verifying the node's checksum
    /// header against the payload before returning it. `Ok(None)` means the
    /// node reported `nf` — not found is not an error for `get`.
    #[instrument(skip(self, cancel), fields(key = %key))]
    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, CacheError> {
        let mut request = self.conn.rent().await;
        request.set_action(Action::Get);
        request.set_header(HeaderTag::ObjectId, key.as_bytes().to_vec());

        let response = request.send(self.request_timeout, cancel).await?;
        match response.status() {
            Some(Status::Ok) => {}
            Some(Status::NotFound) => return Ok(None),
            Some(Status::ChecksumMismatch) => return Err(CacheError::InvalidChecksum),
            Some(Status::Error) | None => {
                return Err(CacheError::InvalidStatus(
                    response.header_str(HeaderTag::Status).unwrap_or("<missing>").to_owned(),
                ))
            }
        }

        if let Some(warning) = response.header_str(HeaderTag::ChecksumWarning) {
            warn!(key = %key, warning = %warning, "cache node reported a checksum warning");
        }
        verify_response_checksum(&response)?;
        Ok(Some(response.body))
    }

    /// `get` decoded as `T` via the default JSON codec. `Ok(None)` on `nf`
    /// (matching [`CacheClient::get`]) or on an empty body, per
    /// [`Serializer::deserialize`]'s "null on empty input" contract.
    pub async fn get_with<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.get(key, cancel).await? else {
            return Ok(None);
        };
        let codec = JsonCodec;
        Ok(codec.deserialize(&bytes)?)
    }

    /// Fetch `key` and hand the verified bytes to `callback`, returning
    /// `true` if the object existed (and `callback` ran), `false` on `nf` —
    /// the closure-form sibling of the typed `get`/`get_with`, kept as a
    /// separate method rather than a closure+state pair so callers who just
    /// want to avoid an extra allocation aren't forced into the typed path.
    pub async fn get_cb<S>(&self, key: &str, cancel: &CancellationToken, callback: S) -> Result<bool, CacheError>
    where
        S: FnOnce(&[u8]),
    {
        let Some(bytes) = self.get(key, cancel).await? else {
            return Ok(false);
        };
        callback(&bytes);
        Ok(true)
    }

    /// Remove the object stored at `key`. Returns `true` if it existed,
    /// `false` on `nf` — `nf` is not an error for `delete`.
    #[instrument(skip(self, cancel), fields(key = %key))]
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<bool, CacheError> {
        let mut request = self.conn.rent().await;
        request.set_action(Action::Delete);
        request.set_header(HeaderTag::ObjectId, key.as_bytes().to_vec());

        let response = request.send(self.request_timeout, cancel).await?;
        match response.status() {
            Some(Status::Ok) => Ok(true),
            Some(Status::NotFound) => Ok(false),
            Some(Status::Error) | Some(Status::ChecksumMismatch) | None => Err(CacheError::InvalidStatus(
                response.header_str(HeaderTag::Status).unwrap_or("<missing>").to_owned(),
            )),
        }
    }

    /// Block for the node's next change notification (a long-poll dequeue
    /// of its replication queue; used by the replication worker, component
    /// J). The node's `nf` status is a real event here, not an absent
    /// value — it means the queue is misconfigured for this connection,
    /// and the caller is expected to log it and stop listening, not retry
    /// in a loop treating it as "nothing pending yet".
    pub async fn wait_for_change(&self, cancel: &CancellationToken) -> Result<ChangeEvent, CacheError> {
        let mut request = self.conn.rent().await;
        request.set_action(Action::Dequeue);

        let response = request.send(self.request_timeout, cancel).await?;
        let raw_status = response.header_str(HeaderTag::Status).unwrap_or("<missing>");
        let status = ChangeStatus::from_str(raw_status).ok_or_else(|| CacheError::InvalidStatus(raw_status.to_owned()))?;
        Ok(ChangeEvent {
            status,
            current_id: response.header_str(HeaderTag::ObjectId).map(str::to_owned),
            new_id: response.header_str(HeaderTag::NewObjectId).map(str::to_owned),
        })
    }
}

/// Verify the response's checksum, if it carries one. Fails closed: a
/// `ChecksumValue` with no recognized, implemented `ChecksumType` is
/// treated as a verification failure rather than silently skipped,
/// matching 4.A's "fails closed on unrecognized type" contract.
fn verify_response_checksum(frame: &Frame) -> Result<(), CacheError> {
    let Some(checksum_value) = frame.header_str(HeaderTag::ChecksumValue) else {
        return Ok(());
    };
    match frame.header_str(HeaderTag::ChecksumType).and_then(ChecksumType::from_str) {
        Some(checksum_type) if checksum_type.is_implemented() => {
            if verify_checksum(checksum_type, checksum_value, &frame.body) {
                Ok(())
            } else {
                Err(CacheError::InvalidChecksum)
            }
        }
        _ => Err(CacheError::InvalidChecksum),
    }
}

/// Sentinel return of [`is_client_checksum_valid`], using explicit
/// discriminants so callers that care can match the raw `{-1, -2, 0, 1}`
/// values directly instead of the variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ChecksumValidity {
    /// No `ChecksumType`/`ChecksumValue` header pair was present at all.
    NoChecksum = -1,
    /// A `ChecksumType` was present but isn't implemented (anything but
    /// `fnv1a`).
    UnsupportedType = -2,
    /// Checksum present, algorithm supported, digest did not match.
    Invalid = 0,
    /// Checksum present, algorithm supported, digest matched.
    Valid = 1,
}

/// Used by server-side handlers (built on this crate) validating an
/// inbound upsert's checksum headers against its body. Fails closed: any
/// algorithm other than `fnv1a` is reported as unsupported, never silently
/// accepted.
#[must_use]
pub fn is_client_checksum_valid(inbound: &Frame) -> ChecksumValidity {
    let Some(checksum_type_str) = inbound.header_str(HeaderTag::ChecksumType) else {
        return ChecksumValidity::NoChecksum;
    };
    let Some(checksum_value) = inbound.header_str(HeaderTag::ChecksumValue) else {
        return ChecksumValidity::NoChecksum;
    };
    let Some(checksum_type) = ChecksumType::from_str(checksum_type_str) else {
        return ChecksumValidity::UnsupportedType;
    };
    if !checksum_type.is_implemented() {
        return ChecksumValidity::UnsupportedType;
    }
    if verify_checksum(checksum_type, checksum_value, &inbound.body) {
        ChecksumValidity::Valid
    } else {
        ChecksumValidity::Invalid
    }
}

/// A single replication change event dequeued from a node's change queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub status: ChangeStatus,
    pub current_id: Option<String>,
    pub new_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(checksum_type: Option<&str>, checksum_value: Option<&str>, body: &[u8]) -> Frame {
        let mut frame = Frame::new();
        if let Some(t) = checksum_type {
            frame.set_header(HeaderTag::ChecksumType, t.as_bytes().to_vec());
        }
        if let Some(v) = checksum_value {
            frame.set_header(HeaderTag::ChecksumValue, v.as_bytes().to_vec());
        }
        frame.body = body.to_vec();
        frame
    }

    #[test]
    fn checksum_validity_reports_no_checksum_when_headers_absent() {
        let frame = frame_with(None, None, b"payload");
        assert_eq!(is_client_checksum_valid(&frame), ChecksumValidity::NoChecksum);
    }

    #[test]
    fn checksum_validity_reports_unsupported_for_unimplemented_algorithms() {
        let frame = frame_with(Some("sha256"), Some("whatever"), b"payload");
        assert_eq!(is_client_checksum_valid(&frame), ChecksumValidity::UnsupportedType);
    }

    #[test]
    fn checksum_validity_reports_valid_for_matching_fnv1a_digest() {
        let body = b"payload bytes";
        let digest = vncache_wire::checksum_base32(body);
        let frame = frame_with(Some("fnv1a"), Some(&digest), body);
        assert_eq!(is_client_checksum_valid(&frame), ChecksumValidity::Valid);
    }

    #[test]
    fn checksum_validity_reports_invalid_for_mismatched_digest() {
        let frame = frame_with(Some("fnv1a"), Some("AAAAAAAAAAAAAAAA"), b"payload");
        assert_eq!(is_client_checksum_valid(&frame), ChecksumValidity::Invalid);
    }
}
