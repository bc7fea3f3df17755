//! Connection Manager - Duplex Lifecycle, Reconnection and Fan-Out
//!
//! The `ConnectionManager` owns the single duplex link of a client session.
//! It exchanges the stored access token for a ticket, opens the link,
//! classifies every inbound frame into one of three subscriber registries,
//! and re-establishes the link with capped exponential backoff when it
//! drops.
//!
//! # State Machine
//!
//! ```text
//!                 connect()                 handshake ok
//!  Disconnected ─────────────► Connecting ─────────────► Open
//!       ▲                        │    ▲                    │
//!       │ no token /             │    │ timer fires        │ link closed
//!       │ attempts exhausted     │    │                    │
//!       │                 ticket │    │                    │
//!       │                 or     ▼    │                    │
//!       └──────────────── AwaitingRetry ◄──────────────────┘
//!
//!  any state ── disconnect() ──► Disconnected
//! ```
//!
//! # Attempt Generations
//!
//! Every connection attempt gets a generation number. A new `connect()`, a
//! retry or a `disconnect()` bumps the generation; results that arrive for a
//! superseded generation (a late ticket, a late handshake, a close event
//! from an old link) are discarded and any link they produced is closed.
//! Overlapping `connect()` calls therefore resolve to the newest one.
//!
//! # Locking
//!
//! All mutable state lives behind one `parking_lot::Mutex`. The lock is
//! never held across an `.await` or while subscriber callbacks run, so
//! callbacks may call back into the manager.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::endpoint::{redact, EndpointBuilder, EndpointError};
use crate::frames::{
    ChatMessage, ConversationId, InboundFrame, NotificationEvent, OutboundFrame, StreamKind,
    TypingIndicator,
};
use crate::reconnect::ReconnectPolicy;
use crate::registry::{SubscriberRegistry, Subscription};
use crate::ticket::{AccessToken, TicketError, TicketProvider};
use crate::timer::{Scheduler, TimerHandle, TimerTask};
use crate::transport::{Connector, LinkHandle, ReadyState, TransportEvent, TransportLink};

/// Errors wiring a manager from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    /// The API origin cannot produce duplex endpoints
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// The ticket provider could not be built
    #[error(transparent)]
    Ticket(#[from] TicketError),
}

/// Lifecycle phase of the manager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No link, no retry pending
    Disconnected,
    /// Ticket exchange or handshake in flight
    Connecting,
    /// Link live
    Open,
    /// Link lost; a retry timer is pending
    AwaitingRetry,
}

struct ConnectionState {
    phase: ConnectionPhase,
    link: Option<(u64, LinkHandle)>,
    token: Option<AccessToken>,
    conversation: Option<ConversationId>,
    reconnect_attempts: u32,
    pending_retry: Option<TimerHandle>,
    generation: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            link: None,
            token: None,
            conversation: None,
            reconnect_attempts: 0,
            pending_retry: None,
            generation: 0,
        }
    }
}

impl ConnectionState {
    /// Supersede whatever is in flight and enter `Connecting`
    fn begin_attempt(&mut self) -> u64 {
        if let Some(timer) = self.pending_retry.take() {
            timer.cancel();
        }
        if let Some((_, link)) = self.link.take() {
            link.close();
        }
        self.generation += 1;
        self.phase = ConnectionPhase::Connecting;
        self.generation
    }
}

struct Shared {
    tickets: Arc<dyn TicketProvider>,
    connector: Arc<dyn Connector>,
    endpoints: EndpointBuilder,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    messages: SubscriberRegistry<ChatMessage>,
    notifications: SubscriberRegistry<NotificationEvent>,
    typing: SubscriberRegistry<TypingIndicator>,
}

/// Owner of the session's duplex link
///
/// Cheap to clone; clones share the same link, state and registries.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager from its collaborators
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketProvider>,
        connector: Arc<dyn Connector>,
        endpoints: EndpointBuilder,
        scheduler: Arc<dyn Scheduler>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tickets,
                connector,
                endpoints,
                scheduler,
                policy,
                state: Mutex::new(ConnectionState::default()),
                messages: SubscriberRegistry::new(),
                notifications: SubscriberRegistry::new(),
                typing: SubscriberRegistry::new(),
            }),
        }
    }

    /// Create a manager talking HTTP for tickets and WebSocket for the link
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL is unusable or the HTTP client
    /// cannot be built.
    #[cfg(feature = "websocket")]
    pub fn from_config(config: &crate::config::CourierConfig) -> Result<Self, SetupError> {
        use crate::ticket::HttpTicketProvider;
        use crate::timer::TokioScheduler;
        use crate::transport::websocket::WebSocketConnector;

        Ok(Self::new(
            Arc::new(HttpTicketProvider::from_config(config)?),
            Arc::new(WebSocketConnector::from_config(config)),
            EndpointBuilder::from_api_url(&config.api_url)?,
            Arc::new(TokioScheduler),
            config.reconnect_policy(),
        ))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect, optionally scoped to one conversation
    ///
    /// Stores the token and scope for reconnection, then exchanges the token
    /// for a ticket and opens the link. Failures are never returned: they
    /// schedule a retry under the reconnect policy. Replaces any existing
    /// link, and supersedes any attempt still in flight.
    pub async fn connect(
        &self,
        token: impl Into<AccessToken>,
        conversation: Option<ConversationId>,
    ) {
        let generation = {
            let mut state = self.shared.state.lock();
            state.token = Some(token.into());
            state.conversation = conversation;
            state.reconnect_attempts = 0;
            state.begin_attempt()
        };
        tracing::debug!(generation, "Connect requested");
        self.shared.run_attempt(generation).await;
    }

    /// Tear down the link and forget everything
    ///
    /// Cancels any pending retry, closes the link, clears all three
    /// registries and discards the stored token and scope. Idempotent.
    pub fn disconnect(&self) {
        let link = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            if let Some(timer) = state.pending_retry.take() {
                timer.cancel();
            }
            state.token = None;
            state.conversation = None;
            state.reconnect_attempts = 0;
            state.phase = ConnectionPhase::Disconnected;
            state.link.take()
        };

        if let Some((_, link)) = link {
            link.close();
        }

        self.shared.messages.clear();
        self.shared.notifications.clear();
        self.shared.typing.clear();

        tracing::info!("Disconnected");
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Send a chat message
    ///
    /// Uses `conversation`, falling back to the connection's scope. Returns
    /// `false` (and logs) if the link is not open; nothing is queued.
    pub fn send_message(
        &self,
        message: impl Into<String>,
        conversation: Option<ConversationId>,
    ) -> bool {
        let frame = OutboundFrame::ChatMessage {
            message: message.into(),
            conversation_id: self.effective_scope(conversation),
        };
        self.send_frame(&frame)
    }

    /// Announce that the user started typing
    pub fn start_typing(&self, conversation: Option<ConversationId>) -> bool {
        let frame = OutboundFrame::TypingStart {
            conversation_id: self.effective_scope(conversation),
        };
        self.send_frame(&frame)
    }

    /// Announce that the user stopped typing
    pub fn stop_typing(&self, conversation: Option<ConversationId>) -> bool {
        let frame = OutboundFrame::TypingStop {
            conversation_id: self.effective_scope(conversation),
        };
        self.send_frame(&frame)
    }

    fn effective_scope(&self, explicit: Option<ConversationId>) -> Option<ConversationId> {
        explicit.or_else(|| self.shared.state.lock().conversation.clone())
    }

    fn send_frame(&self, frame: &OutboundFrame) -> bool {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = frame.kind_name(), error = %e, "Outbound frame not encoded");
                return false;
            }
        };

        let state = self.shared.state.lock();
        let link = match (&state.link, state.phase) {
            (Some((_, link)), ConnectionPhase::Open) => link,
            _ => {
                tracing::warn!(
                    kind = frame.kind_name(),
                    phase = ?state.phase,
                    "Not connected; outbound frame dropped"
                );
                return false;
            }
        };

        match link.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = frame.kind_name(), error = %e, "Outbound frame dropped");
                false
            }
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Receive every chat message frame
    pub fn subscribe_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.shared.messages.subscribe(callback)
    }

    /// Receive every notification frame
    pub fn subscribe_notification<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.shared.notifications.subscribe(callback)
    }

    /// Receive every typing indicator frame
    pub fn subscribe_typing<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TypingIndicator) + Send + Sync + 'static,
    {
        self.shared.typing.subscribe(callback)
    }

    /// Number of callbacks registered for `stream`
    #[must_use]
    pub fn subscriber_count(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Messages => self.shared.messages.len(),
            StreamKind::Notifications => self.shared.notifications.len(),
            StreamKind::Typing => self.shared.typing.len(),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Readiness of the link, `Closed` when there is none
    #[must_use]
    pub fn state(&self) -> ReadyState {
        let state = self.shared.state.lock();
        match (&state.link, state.phase) {
            (Some((_, link)), _) => link.ready_state(),
            (None, ConnectionPhase::Connecting) => ReadyState::Connecting,
            (None, _) => ReadyState::Closed,
        }
    }

    /// Whether the link is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ReadyState::Open
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.shared.state.lock().phase
    }

    /// Consecutive retries since the last successful open
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().reconnect_attempts
    }

    /// Whether a retry timer is pending
    #[must_use]
    pub fn has_pending_retry(&self) -> bool {
        self.shared.state.lock().pending_retry.is_some()
    }

    /// Conversation scope of the connection, if any
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.state.lock().conversation.clone()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionManager")
            .field("phase", &state.phase)
            .field("conversation", &state.conversation)
            .field("reconnect_attempts", &state.reconnect_attempts)
            .field("generation", &state.generation)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn credentials(&self, generation: u64) -> Option<(AccessToken, Option<ConversationId>)> {
        let state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        Some((state.token.clone()?, state.conversation.clone()))
    }

    async fn run_attempt(self: &Arc<Self>, generation: u64) {
        let Some((token, conversation)) = self.credentials(generation) else {
            return;
        };

        let ticket = match self.tickets.fetch_ticket(&token).await {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(error = %e, "Ticket exchange failed");
                self.on_closed(generation);
                return;
            }
        };

        if !self.is_current(generation) {
            tracing::debug!(generation, "Discarding ticket for superseded attempt");
            return;
        }
        if ticket.is_expired() {
            tracing::warn!(ttl = ?ticket.ttl(), "Ticket expired before handshake");
            self.on_closed(generation);
            return;
        }

        let endpoint = self.endpoints.for_scope(conversation.as_ref(), &ticket);
        let TransportLink { handle, events } = match self.connector.open(&endpoint).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(endpoint = %redact(&endpoint), error = %e, "Handshake failed");
                self.on_closed(generation);
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                drop(state);
                tracing::debug!(generation, "Closing link for superseded attempt");
                handle.close();
                return;
            }
            state.link = Some((generation, handle));
            state.reconnect_attempts = 0;
            state.phase = ConnectionPhase::Open;
        }

        tracing::info!(
            endpoint = %redact(&endpoint),
            conversation = conversation.as_ref().map(ConversationId::as_str),
            "Connected"
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.pump(generation, events).await });
    }

    async fn pump(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Frame(text) => {
                    if !self.is_current(generation) {
                        break;
                    }
                    self.deliver(&text);
                }
                TransportEvent::Error(e) => {
                    tracing::warn!(error = %e, "Transport error");
                }
                TransportEvent::Closed(info) => {
                    tracing::info!(code = ?info.code, reason = %info.reason, "Link closed");
                    break;
                }
            }
        }
        self.on_closed(generation);
    }

    fn deliver(&self, text: &str) {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        let invoked = match &frame {
            InboundFrame::ChatMessage(message) | InboundFrame::BareMessage(message) => {
                self.messages.dispatch(message)
            }
            InboundFrame::Notification(event) => self.notifications.dispatch(event),
            InboundFrame::TypingIndicator(typing) => self.typing.dispatch(typing),
            InboundFrame::Unknown(_) => {
                tracing::debug!("Ignoring unrecognized frame");
                return;
            }
        };
        tracing::trace!(kind = frame.kind_name(), subscribers = invoked, "Frame dispatched");
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.link = None;
        self.schedule_reconnect(&mut state, generation);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ConnectionState, generation: u64) {
        if let Some(timer) = state.pending_retry.take() {
            timer.cancel();
        }

        if state.token.is_none() {
            state.phase = ConnectionPhase::Disconnected;
            tracing::info!("No stored token; not reconnecting");
            return;
        }
        if !self.policy.allows_attempt(state.reconnect_attempts) {
            state.phase = ConnectionPhase::Disconnected;
            tracing::warn!(
                attempts = state.reconnect_attempts,
                "Reconnect attempts exhausted"
            );
            return;
        }

        state.reconnect_attempts += 1;
        let delay = self.policy.delay_for_attempt(state.reconnect_attempts);
        state.phase = ConnectionPhase::AwaitingRetry;

        let weak = Arc::downgrade(self);
        let task: TimerTask = Box::pin(async move {
            if let Some(shared) = weak.upgrade() {
                shared.fire_retry(generation).await;
            }
        });
        state.pending_retry = Some(self.scheduler.schedule(delay, task));

        tracing::info!(
            attempt = state.reconnect_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    async fn fire_retry(self: Arc<Self>, generation: u64) {
        let next = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            // This timer is the one firing; cancelling it would abort us
            state.pending_retry = None;
            state.begin_attempt()
        };
        tracing::debug!(generation = next, "Retrying connection");
        self.run_attempt(next).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{wait_until, TestHarness};
    use crate::ticket::TicketError;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initial_state() {
        let h = TestHarness::new();
        assert_eq!(h.manager.state(), ReadyState::Closed);
        assert_eq!(h.manager.phase(), ConnectionPhase::Disconnected);
        assert!(!h.manager.is_connected());
        assert_eq!(h.manager.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_unscoped_connect_uses_notifications_route() {
        let h = TestHarness::new();
        h.manager.connect("tok1", None).await;

        assert!(h.manager.is_connected());
        assert_eq!(h.manager.phase(), ConnectionPhase::Open);
        let endpoints = h.connector.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].path(), "/ws/notifications/");
        assert_eq!(h.tickets.calls(), vec![AccessToken::new("tok1")]);
    }

    #[tokio::test]
    async fn test_scoped_connect_uses_chat_route() {
        let h = TestHarness::new();
        h.manager
            .connect("tok1", Some(ConversationId::from("conv42")))
            .await;

        let endpoints = h.connector.endpoints();
        assert_eq!(endpoints[0].path(), "/ws/chat/conv42/");
        assert_eq!(h.manager.conversation(), Some(ConversationId::from("conv42")));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let h = TestHarness::new();
        assert!(!h.manager.send_message("hello", None));
        assert!(!h.manager.start_typing(None));
        assert!(!h.manager.stop_typing(None));
    }

    #[tokio::test]
    async fn test_explicit_scope_overrides_stored_scope() {
        let h = TestHarness::new();
        h.manager
            .connect("tok1", Some(ConversationId::from("a")))
            .await;
        let mut server = h.connector.take_server().unwrap();

        assert!(h.manager.start_typing(Some(ConversationId::from("b"))));
        assert_eq!(
            server.next_outbound().unwrap(),
            serde_json::json!({"type": "typing_start", "conversation_id": "b"})
        );
    }

    #[tokio::test]
    async fn test_ticket_failure_schedules_retry() {
        let h = TestHarness::new();
        h.tickets.fail_next(TicketError::Rejected { status: 401 });
        h.manager.connect("tok1", None).await;

        assert_eq!(h.manager.phase(), ConnectionPhase::AwaitingRetry);
        assert_eq!(h.manager.reconnect_attempts(), 1);
        assert!(h.manager.has_pending_retry());
        assert_eq!(h.scheduler.next_due_in(), Some(Duration::from_millis(2000)));
        assert!(h.connector.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_expired_ticket_not_used() {
        let h = TestHarness::new();
        h.tickets.push_ticket(crate::ticket::Ticket::issued_at(
            "stale",
            chrono::Utc::now() - chrono::Duration::seconds(60),
            Duration::from_secs(10),
        ));
        h.manager.connect("tok1", None).await;

        assert!(h.connector.endpoints().is_empty());
        assert_eq!(h.manager.phase(), ConnectionPhase::AwaitingRetry);
    }

    #[tokio::test]
    async fn test_explicit_connect_resets_attempts() {
        let h = TestHarness::new();
        h.tickets.set_failing(true);
        h.manager.connect("tok1", None).await;
        h.scheduler.advance(Duration::from_millis(2000)).await;
        assert_eq!(h.manager.reconnect_attempts(), 2);

        h.tickets.set_failing(false);
        h.manager.connect("tok1", None).await;
        assert_eq!(h.manager.reconnect_attempts(), 0);
        assert!(h.manager.is_connected());
        assert!(!h.manager.has_pending_retry());
    }

    #[tokio::test]
    async fn test_connect_replaces_live_link() {
        let h = TestHarness::new();
        h.manager.connect("tok1", None).await;
        let mut first = h.connector.take_server().unwrap();

        h.manager
            .connect("tok1", Some(ConversationId::from("7")))
            .await;
        let second = h.connector.take_server().unwrap();

        assert!(first.close_requested());
        assert_eq!(second.ready_state(), ReadyState::Open);
        assert!(h.manager.is_connected());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_reconnect() {
        let h = TestHarness::new();
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let _sub = h.manager.subscribe_message(move |_| *counter.lock() += 1);

        h.manager.connect("tok1", None).await;
        let server = h.connector.take_server().unwrap();
        server.push_error("flaky").await;
        server.push_frame(r#"{"message":"still here"}"#).await;

        wait_until(|| *seen.lock() == 1).await;
        assert_eq!(h.manager.phase(), ConnectionPhase::Open);
        assert!(!h.manager.has_pending_retry());
    }

    #[tokio::test]
    async fn test_disconnect_clears_registries() {
        let h = TestHarness::new();
        let _m = h.manager.subscribe_message(|_| {});
        let _n = h.manager.subscribe_notification(|_| {});
        let _t = h.manager.subscribe_typing(|_| {});
        assert_eq!(h.manager.subscriber_count(StreamKind::Typing), 1);

        h.manager.disconnect();
        for stream in [StreamKind::Messages, StreamKind::Notifications, StreamKind::Typing] {
            assert_eq!(h.manager.subscriber_count(stream), 0);
        }
    }

    #[tokio::test]
    async fn test_no_token_means_no_retry() {
        let h = TestHarness::new();
        h.manager.connect("tok1", None).await;
        let server = h.connector.take_server().unwrap();

        // Forget the token without bumping the generation
        h.manager.shared.state.lock().token = None;
        server.close(1006, "gone").await;

        wait_until(|| h.manager.phase() == ConnectionPhase::Disconnected).await;
        assert!(!h.manager.has_pending_retry());
        assert_eq!(h.scheduler.pending(), 0);
    }
}
