//! Session struct definition
//!
//! Represents one connected peer: its outbound queue, login state and
//! peer address. The inbound side lives in `Inbound`, owned by the
//! session's read loop.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, SendError};
use crate::framer::Framer;
use crate::message::{ClientMessage, ServerMessage};
use crate::types::SessionId;

/// Login state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, no display name yet
    Connected,
    /// Display name claimed
    Authenticated(String),
    /// Terminal
    Closed,
}

/// Connected peer
///
/// Shared as `Arc<Session>` between the registry, the read loop and
/// in-flight dispatcher tasks. Sending to a closed session fails
/// without side effects.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: String,
    state: Mutex<SessionState>,
    /// Server → Client frame payloads
    outbound: mpsc::Sender<Bytes>,
    closing: CancellationToken,
}

impl Session {
    pub fn new(id: SessionId, peer_addr: String, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            peer_addr,
            state: Mutex::new(SessionState::Connected),
            outbound,
            closing: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Transport endpoint as `ip:port`
    pub fn peer_address(&self) -> &str {
        &self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Display name, if logged in
    pub fn username(&self) -> Option<String> {
        match &*self.state.lock() {
            SessionState::Authenticated(name) => Some(name.clone()),
            _ => None,
        }
    }

    /// Name used in log output
    pub fn display_name(&self) -> String {
        self.username().unwrap_or_else(|| self.peer_addr.clone())
    }

    /// Assign the display name
    ///
    /// Only succeeds from `Connected`; a name is assigned at most once.
    pub fn authenticate(&self, name: String) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Connected {
            return false;
        }
        *state = SessionState::Authenticated(name);
        true
    }

    /// Move to `Closed` and signal the read and write loops
    ///
    /// Returns the previous state on the first call, `None` afterwards.
    pub fn close(&self) -> Option<SessionState> {
        let previous = {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return None;
            }
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        self.closing.cancel();
        Some(previous)
    }

    /// Ask the read and write loops to stop
    ///
    /// Queued frames are still flushed. The state change happens when the
    /// read loop hands the session to `Router::disconnect`.
    pub fn request_disconnect(&self) {
        self.closing.cancel();
    }

    /// True once the session can no longer be written to
    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.closing.cancelled().await
    }

    pub(crate) fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Send a message to this session
    ///
    /// Never waits: fails if the session is closed or its queue is full.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let payload = msg
            .to_payload()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        self.send_payload(payload)
    }

    /// Send an already serialized payload
    pub fn send_payload(&self, payload: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::NotConnected);
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Backlogged,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

/// Format a peer address, unwrapping IPv4-mapped IPv6 addresses
pub fn format_peer_addr(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => format!("{}:{}", v4, v6.port()),
            None => format!("{}:{}", v6.ip(), v6.port()),
        },
        SocketAddr::V4(v4) => v4.to_string(),
    }
}

/// Receive buffer for one session
///
/// Accumulates raw socket bytes and yields every complete message.
#[derive(Debug, Default)]
pub struct Inbound {
    buffer: BytesMut,
    framer: Framer,
}

impl Inbound {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            framer: Framer::new(max_frame_len),
        }
    }

    /// Append a chunk and decode as many messages as are complete
    ///
    /// Frames whose payload is not a valid client message are dropped.
    /// An error means the stream cannot be resynchronized.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> Result<Vec<ClientMessage>, AppError> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(payload) = self.framer.decode(&mut self.buffer)? {
            match ClientMessage::from_payload(&payload) {
                Some(msg) => messages.push(msg),
                None => debug!("Dropping malformed payload ({} bytes)", payload.len()),
            }
        }
        Ok(messages)
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
