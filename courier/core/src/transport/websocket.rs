//! WebSocket Connector
//!
//! Client-side duplex transport over `tokio-tungstenite`. The handshake runs
//! under the configured timeout; once open, a single task drives both
//! directions of the socket:
//!
//! ```text
//!   LinkCommand::Text ──► sink.send(Text)
//!   LinkCommand::Close ─► sink.send(Close(1000))  ──► finish
//!   source Text/Binary ─► TransportEvent::Frame
//!   source error ───────► TransportEvent::Error   ──► finish
//!   source Close / EOF ────────────────────────────► finish
//! ```
//!
//! `finish` emits the single [`TransportEvent::Closed`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{
    CloseInfo, Connector, LinkCommand, LinkPeer, ReadyState, TransportError, TransportEvent,
    TransportLink,
};
use crate::config::CourierConfig;
use crate::endpoint::redact;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens links over WebSocket
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    channel_capacity: usize,
    max_frame_size: usize,
}

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new(connect_timeout: Duration, channel_capacity: usize, max_frame_size: usize) -> Self {
        Self {
            connect_timeout,
            channel_capacity,
            max_frame_size,
        }
    }

    /// Create a connector from configuration
    #[must_use]
    pub fn from_config(config: &CourierConfig) -> Self {
        Self::new(
            config.connect_timeout(),
            config.channel_capacity,
            config.max_frame_size,
        )
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        let shown = redact(endpoint);

        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(endpoint.as_str()))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::ConnectionFailed(format!("{shown}: {e}")))?;

        tracing::info!(endpoint = %shown, "WebSocket connected");

        let (link, peer) = TransportLink::channel(self.channel_capacity);
        tokio::spawn(drive(socket, peer, self.max_frame_size));
        Ok(link)
    }
}

async fn drive(socket: Socket, mut peer: LinkPeer, max_frame_size: usize) {
    let (mut sink, mut source) = socket.split();

    let info = loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    forward(&peer, text, max_frame_size).await;
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => forward(&peer, text, max_frame_size).await,
                    Err(e) => tracing::warn!(
                        len = e.as_bytes().len(),
                        "Dropping non-UTF-8 binary frame"
                    ),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || CloseInfo::abnormal("closed without frame"),
                        |f| CloseInfo::new(u16::from(f.code), f.reason.to_string()),
                    );
                }
                // Ping/pong handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    report(&peer, e.to_string()).await;
                    break CloseInfo::abnormal(e.to_string());
                }
                None => break CloseInfo::abnormal("stream ended"),
            },

            command = peer.commands.recv() => match command {
                Some(LinkCommand::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "WebSocket write error");
                        report(&peer, e.to_string()).await;
                        break CloseInfo::abnormal(e.to_string());
                    }
                }
                Some(LinkCommand::Close) | None => {
                    peer.set_ready_state(ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closing".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "Close frame not sent");
                    }
                    break CloseInfo::new(1000, "client closing");
                }
            },
        }
    };

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Socket close error");
    }
    tracing::info!(code = ?info.code, reason = %info.reason, "WebSocket closed");
    peer.finish(info).await;
}

async fn forward(peer: &LinkPeer, text: String, max_frame_size: usize) {
    if text.len() > max_frame_size {
        tracing::warn!(
            size = text.len(),
            max = max_frame_size,
            "Dropping oversized frame"
        );
        return;
    }
    if peer.events.send(TransportEvent::Frame(text)).await.is_err() {
        tracing::debug!("Link events receiver dropped");
    }
}

async fn report(peer: &LinkPeer, error: String) {
    if peer.events.send(TransportEvent::Error(error)).await.is_err() {
        tracing::debug!("Link events receiver dropped");
    }
}
