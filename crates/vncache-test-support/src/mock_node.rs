//! A mock cache node for integration tests: accepts WebSocket connections
//! on `127.0.0.1:0` and plays the server side of the get/update/delete/
//! dequeue protocol against an in-memory object store and change queue.
//!
//! Grounded on `rt-test-utils::MockWsServer`'s bind-to-port-0 /
//! accept-loop / one-task-per-connection shape, generalized from a JSON
//! text-message protocol to this crate's binary `Frame` framing.

use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;
use vncache_wire::{checksum_base32, Action, ChangeStatus, Frame, HeaderTag, Status};

#[derive(Clone)]
struct QueuedChange {
    status: ChangeStatus,
    current_id: Option<String>,
    new_id: Option<String>,
}

struct State {
    objects: HashMap<String, Vec<u8>>,
    changes: VecDeque<QueuedChange>,
    /// Keys whose `get` response should carry this deliberately wrong
    /// `ChecksumValue` instead of the correct one, for exercising the
    /// client's checksum-mismatch handling (S3).
    bad_checksums: HashMap<String, String>,
    /// Keys whose `update` request should be answered with `Status::Error`
    /// instead of being applied, for exercising the write-through
    /// invariant on a remote-rejected upsert.
    rejected_updates: std::collections::HashSet<String>,
}

/// A single-node mock server. Every connection it accepts shares the same
/// object store and change queue, so a test can seed state, connect a
/// real `Connection`, and observe it.
pub struct MockCacheNode {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockCacheNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock cache node");
        let addr = listener.local_addr().expect("mock cache node local_addr");
        let state = Arc::new(Mutex::new(State {
            objects: HashMap::new(),
            changes: VecDeque::new(),
            bad_checksums: HashMap::new(),
            rejected_updates: std::collections::HashSet::new(),
        }));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            let _ = handle_connection(stream, state).await;
                        });
                    }
                    Err(_) => return,
                }
            }
        });

        Self { addr, state, _task: task }
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/cache", self.addr)
    }

    /// Seed an object with a correct checksum, as if a prior `add_or_update`
    /// had succeeded.
    pub fn seed(&self, key: &str, value: &[u8]) {
        self.state.lock().unwrap().objects.insert(key.to_owned(), value.to_vec());
    }

    /// Seed an object whose `get` response reports `wrong_checksum` as the
    /// `ChecksumValue` header instead of the body's real digest, to drive
    /// a client through its checksum-mismatch handling.
    pub fn seed_with_bad_checksum(&self, key: &str, value: &[u8], wrong_checksum: &str) {
        let mut guard = self.state.lock().unwrap();
        guard.objects.insert(key.to_owned(), value.to_vec());
        guard.bad_checksums.insert(key.to_owned(), wrong_checksum.to_owned());
    }

    /// Whether `key` is currently present (for assertions after a delete).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    /// Queue a change event a `get_cb`/replication listener's next dequeue
    /// will observe.
    pub fn push_modified(&self, current_id: &str, new_id: Option<&str>) {
        self.state.lock().unwrap().changes.push_back(QueuedChange {
            status: ChangeStatus::Modified,
            current_id: Some(current_id.to_owned()),
            new_id: new_id.map(str::to_owned),
        });
    }

    pub fn push_deleted(&self, current_id: &str) {
        self.state.lock().unwrap().changes.push_back(QueuedChange {
            status: ChangeStatus::Deleted,
            current_id: Some(current_id.to_owned()),
            new_id: None,
        });
    }

    /// Make every subsequent `update` for `key` fail with `Status::Error`
    /// instead of being applied, to exercise a write-through client's
    /// handling of a remote-rejected upsert.
    pub fn reject_updates(&self, key: &str) {
        self.state.lock().unwrap().rejected_updates.insert(key.to_owned());
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<Mutex<State>>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    while let Some(message) = read.next().await {
        let message = message?;
        let bytes = match message {
            Message::Binary(b) => b,
            Message::Close(_) => break,
            Message::Ping(data) => {
                write.send(Message::Pong(data)).await?;
                continue;
            }
            _ => continue,
        };

        let Ok(request) = Frame::decode(&bytes) else { continue };
        // Dequeue is a long-poll wait-for-change, not an instant
        // pop-or-nf: block (briefly, with retries) for an event to
        // appear before reporting `nf`, matching a real server's
        // wait-for-change primitive rather than a bare queue peek.
        let response = if request.action() == Some(Action::Dequeue) {
            handle_dequeue(&state).await
        } else {
            dispatch(&request, &state)
        };
        let Ok(encoded) = response.encode() else { continue };
        write.send(Message::Binary(encoded.into())).await?;
    }

    Ok(())
}

fn dispatch(request: &Frame, state: &Arc<Mutex<State>>) -> Frame {
    match request.action() {
        Some(Action::Get) => handle_get(request, state),
        Some(Action::Update) => handle_update(request, state),
        Some(Action::Delete) => handle_delete(request, state),
        Some(Action::Dequeue) => unreachable!("dequeue is handled before dispatch"),
        None => {
            let mut response = Frame::new();
            response.set_status(Status::Error);
            response
        }
    }
}

fn handle_get(request: &Frame, state: &Arc<Mutex<State>>) -> Frame {
    let mut response = Frame::new();
    let Some(key) = request.header_str(HeaderTag::ObjectId) else {
        response.set_status(Status::Error);
        return response;
    };

    let guard = state.lock().unwrap();
    match guard.objects.get(key) {
        Some(bytes) => {
            let checksum = guard
                .bad_checksums
                .get(key)
                .cloned()
                .unwrap_or_else(|| checksum_base32(bytes));
            response.set_status(Status::Ok);
            response.set_header(HeaderTag::ChecksumType, b"fnv1a".to_vec());
            response.set_header(HeaderTag::ChecksumValue, checksum.into_bytes());
            response.body = bytes.clone();
        }
        None => response.set_status(Status::NotFound),
    }
    response
}

fn handle_update(request: &Frame, state: &Arc<Mutex<State>>) -> Frame {
    let mut response = Frame::new();
    let Some(key) = request.header_str(HeaderTag::ObjectId) else {
        response.set_status(Status::Error);
        return response;
    };

    if state.lock().unwrap().rejected_updates.contains(key) {
        response.set_status(Status::Error);
        return response;
    }

    let new_key = request.header_str(HeaderTag::NewObjectId).map(str::to_owned);

    if let Some(expected) = request.header_str(HeaderTag::ChecksumValue) {
        if checksum_base32(&request.body) != expected {
            response.set_status(Status::ChecksumMismatch);
            return response;
        }
    }

    let mut guard = state.lock().unwrap();
    let target = new_key.unwrap_or_else(|| key.to_owned());
    if target != key {
        guard.objects.remove(key);
    }
    guard.objects.insert(target, request.body.clone());
    response.set_status(Status::Ok);
    response
}

fn handle_delete(request: &Frame, state: &Arc<Mutex<State>>) -> Frame {
    let mut response = Frame::new();
    let Some(key) = request.header_str(HeaderTag::ObjectId) else {
        response.set_status(Status::Error);
        return response;
    };
    let mut guard = state.lock().unwrap();
    if guard.objects.remove(key).is_some() {
        response.set_status(Status::Ok);
    } else {
        response.set_status(Status::NotFound);
    }
    response
}

/// Long-poll the change queue: retry for up to `DEQUEUE_WAIT` before
/// reporting `nf`, so a test that enqueues an event shortly after a
/// listener's dequeue request is not racing an instant empty-queue
/// rejection (which the replication worker treats as a fatal
/// misconfiguration, not "nothing pending yet").
const DEQUEUE_WAIT: std::time::Duration = std::time::Duration::from_secs(5);
const DEQUEUE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

async fn handle_dequeue(state: &Arc<Mutex<State>>) -> Frame {
    let deadline = tokio::time::Instant::now() + DEQUEUE_WAIT;
    let change = loop {
        if let Some(change) = state.lock().unwrap().changes.pop_front() {
            break Some(change);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(DEQUEUE_POLL_INTERVAL).await;
    };

    let mut response = Frame::new();
    match change {
        Some(change) => {
            response.set_header(HeaderTag::Status, change.status.as_str().as_bytes().to_vec());
            if let Some(current_id) = change.current_id {
                response.set_header(HeaderTag::ObjectId, current_id.into_bytes());
            }
            if let Some(new_id) = change.new_id {
                response.set_header(HeaderTag::NewObjectId, new_id.into_bytes());
            }
        }
        None => {
            response.set_header(HeaderTag::Status, ChangeStatus::NotFound.as_str().as_bytes().to_vec());
        }
    }
    response
}
