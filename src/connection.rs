//! Request/response protocol adapter over a single WebSocket connection.
//!
//! Grounded on `services/forwarder/src/uplink.rs`'s `UplinkSession`: a
//! `connect_async` call producing an authenticated request (there, a
//! `Bearer` header carrying a raw token; here, one carrying the JWT
//! `AuthManager::sign_handshake` produces), then a single `WsStream` used
//! for every subsequent send/receive.
//!
//! `Frame` carries no request-correlation ID, so only one request may be
//! in flight on a connection at a time or a response could be matched to
//! the wrong caller. `RequestPool` enforces this with a `Semaphore::new(1)`;
//! `RentedRequest` is the rented permit plus a scratch `Frame`, consumed by
//! `send()` so the permit is always released via `Drop`, on every exit
//! path including cancellation and timeout.

use crate::error::CacheError;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vncache_wire::Frame;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a WebSocket upgrade request carrying the handshake JWT as a
/// bearer token, the way `uplink.rs::build_ws_request` carries a raw
/// forwarder token.
fn build_authenticated_request(
    endpoint: &str,
    handshake_jwt: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, CacheError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| CacheError::ServerNegotiationFailed(format!("invalid endpoint '{endpoint}': {e}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {handshake_jwt}")
            .parse()
            .map_err(|e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                CacheError::ServerNegotiationFailed(format!("invalid auth header: {e}"))
            })?,
    );
    Ok(request)
}

/// A live connection to one cache node: the WebSocket stream plus the
/// single-permit pool that serializes request/response pairs on it.
pub struct Connection {
    ws: Mutex<WsStream>,
    pool: Arc<Semaphore>,
    broken: AtomicBool,
    pub node_id: String,
}

impl Connection {
    /// Connect to `endpoint`, presenting `handshake_jwt` as a bearer token
    /// during the WebSocket upgrade.
    pub async fn connect(node_id: String, endpoint: &str, handshake_jwt: &str) -> Result<Self, CacheError> {
        let request = build_authenticated_request(endpoint, handshake_jwt)?;
        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        debug!(node_id = %node_id, endpoint = %endpoint, "connected to cache node");
        Ok(Self {
            ws: Mutex::new(ws),
            pool: Arc::new(Semaphore::new(1)),
            broken: AtomicBool::new(false),
            node_id,
        })
    }

    /// Whether a prior read or write observed a fatal transport error.
    /// The supervisor polls this to notice a dead connection without
    /// itself performing traffic on it.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Rent the connection's single request slot. Blocks until any
    /// in-flight request on this connection has completed.
    pub async fn rent(&self) -> RentedRequest<'_> {
        let permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .expect("connection semaphore is never closed");
        RentedRequest {
            conn: self,
            _permit: permit,
            frame: Frame::new(),
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), CacheError> {
        let bytes = frame.encode()?;
        let mut ws = self.ws.lock().await;
        if let Err(e) = ws.send(Message::Binary(bytes.into())).await {
            self.broken.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_frame(&self) -> Result<Frame, CacheError> {
        let mut ws = self.ws.lock().await;
        loop {
            match ws.next().await {
                None => {
                    self.broken.store(true, Ordering::Release);
                    return Err(CacheError::NotConnected);
                }
                Some(Err(e)) => {
                    self.broken.store(true, Ordering::Release);
                    return Err(CacheError::Transport(e));
                }
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::decode(&bytes)?),
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    self.broken.store(true, Ordering::Release);
                    return Err(CacheError::NotConnected);
                }
                Some(Ok(other)) => {
                    warn!(?other, "ignoring non-binary message on cache connection");
                }
            }
        }
    }
}

/// The rented single request slot on a `Connection`, holding the
/// semaphore permit and a scratch `Frame` the caller populates before
/// sending. Consuming `self` in `send` guarantees the permit — and so the
/// next caller's turn — is released on every exit path: success, protocol
/// error, timeout, or cancellation.
pub struct RentedRequest<'a> {
    conn: &'a Connection,
    _permit: OwnedSemaphorePermit,
    frame: Frame,
}

impl<'a> RentedRequest<'a> {
    pub fn set_action(&mut self, action: vncache_wire::Action) {
        self.frame.set_action(action);
    }

    pub fn set_header(&mut self, tag: vncache_wire::HeaderTag, value: impl Into<Vec<u8>>) {
        self.frame.set_header(tag, value);
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.frame.body = body;
    }

    /// Send the populated frame and await the matching response, bounded
    /// by `timeout` (a zero duration disables the bound) and `cancel`.
    pub async fn send(self, timeout: Duration, cancel: &CancellationToken) -> Result<Frame, CacheError> {
        let wait = async {
            self.conn.write_frame(&self.frame).await?;
            self.conn.read_frame().await
        };

        if timeout.is_zero() {
            return tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CacheError::Cancelled),
                result = wait => result,
            };
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CacheError::Cancelled),
            result = tokio::time::timeout(timeout, wait) => {
                result.map_err(|_| CacheError::Timeout(timeout))?
            }
        }
    }
}
