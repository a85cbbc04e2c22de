//! The crate's single application-facing error type. Per-crate errors from
//! `vncache-wire`, `vncache-codec`, `vncache-auth`, `vncache-discovery`, and
//! `vncache-local-cache` are wrapped in via `#[from]`: small per-module
//! `thiserror` enums composed into one caller-facing error rather than a
//! flat stringly-typed error.

use vncache_auth::AuthError;
use vncache_codec::CodecError;
use vncache_discovery::DiscoveryError;
use vncache_local_cache::LocalCacheError;
use vncache_wire::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Response carried a status code not expected by the operation that
    /// issued the request. Carries the literal wire status string.
    #[error("unexpected status from cache node: {0}")]
    InvalidStatus(String),

    /// `nf` returned where the caller required the object to already
    /// exist (the rename path of `add_or_update`).
    #[error("object not found")]
    ObjectNotFound,

    /// Payload digest mismatched the `ChecksumValue` header, or the node
    /// reported `cm` on an upsert.
    #[error("checksum verification failed")]
    InvalidChecksum,

    /// The underlying connection reported a malformed or missing response
    /// to a sent request.
    #[error("invalid or missing response from cache node")]
    InvalidResponse,

    /// Outbound body exceeds the negotiated/configured message size.
    #[error("payload of {actual} bytes exceeds the configured max_object_size of {max} bytes")]
    MessageTooLarge { actual: usize, max: usize },

    /// Operation attempted while the connection supervisor is outside
    /// `Listen`.
    #[error("not connected to a cache node")]
    NotConnected,

    /// Initial handshake was rejected by the node.
    #[error("server negotiation failed: {0}")]
    ServerNegotiationFailed(String),

    /// A discovery pass failed to resolve any nodes.
    #[error("discovery failed: {0}")]
    DiscoveryFailure(String),

    /// Cancellation token fired while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// Sign/verify requested against a JWK that is neither RSA nor ECDSA.
    #[error("unsupported key type")]
    UnsupportedKey,

    /// A request timed out before the node responded.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("key must be non-empty after trimming")]
    EmptyKey,

    #[error(transparent)]
    Wire(#[from] FrameError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    LocalCache(#[from] LocalCacheError),
    #[error("websocket transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}
