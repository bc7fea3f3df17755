//! Transport Layer for the Duplex Connection
//!
//! Separates the wire mechanism from connection lifecycle logic. A
//! [`Connector`] performs the handshake and hands back a [`TransportLink`]:
//!
//! ```text
//!   ConnectionManager                         transport task(s)
//!  ┌──────────────────┐  LinkCommand (mpsc)  ┌──────────────────┐
//!  │    LinkHandle    │ ───────────────────► │     LinkPeer     │
//!  │                  │                      │                  │
//!  │  events (mpsc)   │ ◄─────────────────── │  TransportEvent  │
//!  └──────────────────┘                      └──────────────────┘
//!            └──────── ReadyState (Arc<AtomicU8>) ───────┘
//! ```
//!
//! The peer side emits exactly one [`TransportEvent::Closed`] when the
//! connection ends, whoever initiated it; errors are reported separately
//! and do not imply closure.
//!
//! Implementations:
//! - `websocket`: `tokio-tungstenite` client (feature `websocket`)
//! - `test_utils::FakeConnector`: scripted in-process links for tests

#[cfg(feature = "websocket")]
pub mod websocket;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake with the peer failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Handshake did not complete in time
    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection is closed
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be queued
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The link is not in a state that allows the operation
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Readiness of a link, mirroring the duplex handle's lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in flight
    Connecting = 0,
    /// Frames may be exchanged
    Open = 1,
    /// Close requested, not yet complete
    Closing = 2,
    /// No connection
    Closed = 3,
}

impl ReadyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move to `Closing` unless already closing or closed
    fn begin_close(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                match ReadyState::from_u8(raw) {
                    ReadyState::Closing | ReadyState::Closed => None,
                    _ => Some(ReadyState::Closing as u8),
                }
            })
            .is_ok()
    }
}

/// Why a link closed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent one
    pub code: Option<u16>,
    /// Close reason, possibly empty
    pub reason: String,
}

impl CloseInfo {
    /// A close with a code and reason
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// A close without a close frame
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

/// Events produced by the peer side of a link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived
    Frame(String),
    /// A transport error was observed
    Error(String),
    /// The link closed; always the last event
    Closed(CloseInfo),
}

/// Commands sent to the peer side of a link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkCommand {
    /// Transmit a text frame
    Text(String),
    /// Close the connection
    Close,
}

/// Sending half of an open link, owned by the connection manager
#[derive(Clone, Debug)]
pub struct LinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    state: SharedReadyState,
}

impl LinkHandle {
    /// Current readiness
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the link is open, `SendFailed` if the outbound
    /// queue is full, `ConnectionClosed` if the peer task is gone.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(TransportError::InvalidState(format!("link is {state}")));
        }

        self.commands.try_send(LinkCommand::Text(text)).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::SendFailed("outbound queue full".into()),
            TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    /// Request a close. Idempotent.
    pub fn close(&self) {
        if self.state.begin_close() {
            if let Err(e) = self.commands.try_send(LinkCommand::Close) {
                // The peer closes anyway once every handle is dropped
                tracing::debug!(error = %e, "Close command not queued");
            }
        }
    }
}

/// An open link as returned by a [`Connector`]
#[derive(Debug)]
pub struct TransportLink {
    /// Sending half
    pub handle: LinkHandle,
    /// Inbound events, ending with [`TransportEvent::Closed`]
    pub events: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Create an open link and the peer side that drives it
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, LinkPeer) {
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let state = SharedReadyState::new(ReadyState::Open);

        let link = Self {
            handle: LinkHandle {
                commands: command_tx,
                state: state.clone(),
            },
            events: event_rx,
        };
        let peer = LinkPeer {
            commands: command_rx,
            events: event_tx,
            state,
        };
        (link, peer)
    }
}

/// Transport-side half of a link
#[derive(Debug)]
pub struct LinkPeer {
    /// Commands from the manager
    pub commands: mpsc::Receiver<LinkCommand>,
    /// Events to the manager
    pub events: mpsc::Sender<TransportEvent>,
    state: SharedReadyState,
}

impl LinkPeer {
    /// Current readiness
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Update readiness
    pub fn set_ready_state(&self, state: ReadyState) {
        self.state.set(state);
    }

    /// Mark the link closed and emit the final event
    pub async fn finish(&self, info: CloseInfo) {
        self.state.set(ReadyState::Closed);
        if self.events.send(TransportEvent::Closed(info)).await.is_err() {
            tracing::debug!("Link events receiver dropped before close");
        }
    }
}

/// Opens duplex links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake against `endpoint`
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError>;
}
