//! Per-connection handle shared between a connection's own read loop and the
//! dispatch pipeline's fan-out.
//!
//! The two roles are split: cheap,
//! `Clone + Hash + Eq` identity (`user_id`, an opaque connection id) lives on
//! the handle directly so the hub can key `HashSet<ConnectionHandle>` by it;
//! everything mutable (outbound sequencer, session wiring, compression) sits
//! behind a `tokio::sync::Mutex` so dispatch can call [`send_event`] from a
//! different task than the one driving the socket.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::websocket::hub::Hub;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A frame queued for the socket-writing task. `Close` lets any holder of a
/// `ConnectionHandle` — including a different task — terminate the
/// connection without reaching into the task driving the actual `WebSocket`.
#[derive(Debug)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close(u16, String),
}

struct ConnState {
    session_id: String,
    compress: bool,
    seq: i64,
    hub: Option<Hub>,
}

/// Handle to one live gateway connection. Cloning shares the same connection
/// identity and mutable state; the hub stores clones in its connection sets
/// and the dispatch pipeline clones them out via `Hub::targets`.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub user_id: i64,
    id: u64,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    inner: Arc<Mutex<ConnState>>,
}

impl ConnectionHandle {
    pub fn new(user_id: i64, tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        ConnectionHandle {
            user_id,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            inner: Arc::new(Mutex::new(ConnState {
                session_id: String::new(),
                compress: false,
                seq: 0,
                hub: None,
            })),
        }
    }

    /// Wire this handle to its preserved gateway session, so `send_event`
    /// can mirror outbound frames into `Hub::update_session`.
    pub async fn configure_session(&self, session_id: String, hub: Hub) {
        let mut inner = self.inner.lock().await;
        inner.session_id = session_id;
        inner.hub = Some(hub);
    }

    pub async fn set_compress(&self, compress: bool) {
        self.inner.lock().await.compress = compress;
    }

    /// Restore the sequencer to a resumed session's last-known `seq`, so the
    /// next `send_event` continues numbering from there.
    pub async fn restore_seq(&self, seq: i64) {
        self.inner.lock().await.seq = seq;
    }

    pub async fn session_id(&self) -> String {
        self.inner.lock().await.session_id.clone()
    }

    /// Send a syncable dispatch event: assigns the next `seq`, mirrors the
    /// resulting frame into the hub's preserved session (so a later `resume`
    /// can replay it), then transmits.
    pub async fn send_event(&self, kind: &str, d: Value) {
        let (seq, compress, session_id, hub) = {
            let mut inner = self.inner.lock().await;
            inner.seq += 1;
            (
                inner.seq,
                inner.compress,
                inner.session_id.clone(),
                inner.hub.clone(),
            )
        };
        let frame = json!({ "type": kind, "d": d, "seq": seq });
        if let Some(hub) = hub {
            hub.update_session(&session_id, frame.clone(), seq).await;
        }
        self.transmit(&frame, compress);
    }

    /// Send a control frame (`hello`, `heartbeat_ack`, `resumed`, or an
    /// inline `error`) that never carries a `seq` and is never mirrored into
    /// the replay buffer.
    pub async fn send_unsequenced(&self, kind: &str, d: Value) {
        let compress = self.inner.lock().await.compress;
        let frame = json!({ "type": kind, "d": d });
        self.transmit(&frame, compress);
    }

    /// Transmit an already-built, already-sequenced frame verbatim — used to
    /// replay buffered events on `resume` without re-numbering them.
    pub async fn send_value(&self, value: Value) {
        let compress = self.inner.lock().await.compress;
        self.transmit(&value, compress);
    }

    /// Queue a close frame. Fire-and-forget: the socket-writing task picks
    /// it up and tears the connection down from wherever it happens to be.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(OutboundFrame::Close(code, reason.to_string()));
    }

    fn transmit(&self, value: &Value, compress: bool) {
        let frame = if compress {
            match serde_json::to_vec(value) {
                Ok(bytes) => match zstd::stream::encode_all(bytes.as_slice(), 3) {
                    Ok(compressed) => OutboundFrame::Binary(compressed),
                    Err(_) => OutboundFrame::Text(value.to_string()),
                },
                Err(_) => return,
            }
        } else {
            OutboundFrame::Text(value.to_string())
        };
        let _ = self.tx.send(frame);
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
