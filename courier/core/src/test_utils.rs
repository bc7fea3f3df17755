//! Test Doubles for the Connection Manager
//!
//! Scripted, in-process stand-ins for the ticket endpoint and the duplex
//! transport, plus a harness wiring them to a [`ConnectionManager`] driven
//! by a [`ManualScheduler`].
//!
//! # Example
//!
//! ```ignore
//! use courier_core::test_utils::TestHarness;
//!
//! let h = TestHarness::new();
//! h.manager.connect("tok1", None).await;
//!
//! let mut server = h.connector.take_server().unwrap();
//! server.push_frame(r#"{"type":"notification"}"#).await;
//! server.close(1006, "gone").await;
//!
//! h.scheduler.advance(Duration::from_millis(2000)).await;
//! assert_eq!(h.connector.endpoints().len(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::endpoint::EndpointBuilder;
use crate::manager::ConnectionManager;
use crate::reconnect::ReconnectPolicy;
use crate::ticket::{AccessToken, Ticket, TicketError, TicketProvider};
use crate::timer::ManualScheduler;
use crate::transport::{
    CloseInfo, Connector, LinkCommand, LinkPeer, ReadyState, TransportError, TransportEvent,
    TransportLink,
};

/// API origin used by [`TestHarness`]
pub const TEST_API_URL: &str = "http://localhost:8000";

// ============================================================================
// Ticket Provider
// ============================================================================

enum ScriptedTicket {
    Ready(Result<Ticket, TicketError>),
    Gated(Result<Ticket, TicketError>, oneshot::Receiver<()>),
}

#[derive(Default)]
struct TicketScript {
    queue: VecDeque<ScriptedTicket>,
    failing: bool,
    issued: u64,
    calls: Vec<AccessToken>,
}

/// Scripted ticket provider
///
/// Answers from its script first; with an empty script it issues fresh
/// tickets named `ticket-N`, or rejects with 401 while failing.
#[derive(Clone, Default)]
pub struct FakeTicketProvider {
    script: Arc<Mutex<TicketScript>>,
}

impl FakeTicketProvider {
    /// Create a provider that issues tickets
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request with `ticket`
    pub fn push_ticket(&self, ticket: Ticket) {
        self.script
            .lock()
            .queue
            .push_back(ScriptedTicket::Ready(Ok(ticket)));
    }

    /// Fail the next request with `error`
    pub fn fail_next(&self, error: TicketError) {
        self.script
            .lock()
            .queue
            .push_back(ScriptedTicket::Ready(Err(error)));
    }

    /// Answer the next request with `result`, but only once the returned
    /// sender fires (or is dropped)
    pub fn push_gated(&self, result: Result<Ticket, TicketError>) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.script
            .lock()
            .queue
            .push_back(ScriptedTicket::Gated(result, gate));
        release
    }

    /// Reject every unscripted request
    pub fn set_failing(&self, failing: bool) {
        self.script.lock().failing = failing;
    }

    /// Tokens presented so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<AccessToken> {
        self.script.lock().calls.clone()
    }

    /// Number of requests so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().calls.len()
    }
}

#[async_trait]
impl TicketProvider for FakeTicketProvider {
    async fn fetch_ticket(&self, token: &AccessToken) -> Result<Ticket, TicketError> {
        let next = {
            let mut script = self.script.lock();
            script.calls.push(token.clone());
            match script.queue.pop_front() {
                Some(scripted) => scripted,
                None if script.failing => {
                    ScriptedTicket::Ready(Err(TicketError::Rejected { status: 401 }))
                }
                None => {
                    script.issued += 1;
                    ScriptedTicket::Ready(Ok(Ticket::new(format!("ticket-{}", script.issued))))
                }
            }
        };

        match next {
            ScriptedTicket::Ready(result) => result,
            ScriptedTicket::Gated(result, gate) => {
                let _ = gate.await;
                result
            }
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

#[derive(Default)]
struct ConnectorScript {
    failures: VecDeque<TransportError>,
    failing: bool,
    endpoints: Vec<Url>,
    servers: VecDeque<FakeServer>,
}

/// Scripted connector producing in-process links
///
/// Every successful `open` queues a [`FakeServer`] for the test to take.
#[derive(Clone)]
pub struct FakeConnector {
    script: Arc<Mutex<ConnectorScript>>,
    capacity: usize,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnector {
    /// Create a connector whose handshakes succeed
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(ConnectorScript::default())),
            capacity: 32,
        }
    }

    /// Fail the next handshake with `error`
    pub fn fail_next(&self, error: TransportError) {
        self.script.lock().failures.push_back(error);
    }

    /// Fail every unscripted handshake
    pub fn set_failing(&self, failing: bool) {
        self.script.lock().failing = failing;
    }

    /// Every endpoint a handshake was attempted against, in order
    #[must_use]
    pub fn endpoints(&self) -> Vec<Url> {
        self.script.lock().endpoints.clone()
    }

    /// Take the server side of the oldest link not yet taken
    #[must_use]
    pub fn take_server(&self) -> Option<FakeServer> {
        self.script.lock().servers.pop_front()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        let mut script = self.script.lock();
        script.endpoints.push(endpoint.clone());

        if let Some(error) = script.failures.pop_front() {
            return Err(error);
        }
        if script.failing {
            return Err(TransportError::ConnectionFailed("scripted failure".into()));
        }

        let (link, peer) = TransportLink::channel(self.capacity);
        script.servers.push_back(FakeServer {
            peer,
            endpoint: endpoint.clone(),
        });
        Ok(link)
    }
}

/// Server side of one fake link
pub struct FakeServer {
    peer: LinkPeer,
    endpoint: Url,
}

impl FakeServer {
    /// Endpoint the link was opened against
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ticket carried by the endpoint
    #[must_use]
    pub fn ticket(&self) -> Option<String> {
        self.endpoint
            .query_pairs()
            .find(|(key, _)| key == "ticket")
            .map(|(_, value)| value.into_owned())
    }

    /// Readiness as seen by the client
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.peer.ready_state()
    }

    /// Deliver a text frame to the client
    pub async fn push_frame(&self, text: impl Into<String>) {
        let _ = self.peer.events.send(TransportEvent::Frame(text.into())).await;
    }

    /// Deliver a JSON frame to the client
    pub async fn push_json(&self, value: &Value) {
        self.push_frame(value.to_string()).await;
    }

    /// Report a transport error without closing
    pub async fn push_error(&self, error: impl Into<String>) {
        let _ = self.peer.events.send(TransportEvent::Error(error.into())).await;
    }

    /// Close the link from the server side
    pub async fn close(&self, code: u16, reason: &str) {
        self.peer.finish(CloseInfo::new(code, reason)).await;
    }

    /// Next outbound text frame, parsed as JSON, skipping other commands
    pub fn next_outbound(&mut self) -> Option<Value> {
        while let Ok(command) = self.peer.commands.try_recv() {
            if let LinkCommand::Text(text) = command {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }

    /// Whether the client asked to close, draining pending commands
    pub fn close_requested(&mut self) -> bool {
        let mut requested = false;
        while let Ok(command) = self.peer.commands.try_recv() {
            requested |= command == LinkCommand::Close;
        }
        requested
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A manager wired to fakes and simulated time
pub struct TestHarness {
    /// The manager under test
    pub manager: ConnectionManager,
    /// Its ticket provider
    pub tickets: FakeTicketProvider,
    /// Its connector
    pub connector: FakeConnector,
    /// Its scheduler
    pub scheduler: ManualScheduler,
}

impl TestHarness {
    /// Harness with the default reconnect policy
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(ReconnectPolicy::default())
    }

    /// Harness with a custom reconnect policy
    ///
    /// # Panics
    ///
    /// Never: [`TEST_API_URL`] is a valid origin.
    #[must_use]
    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        let tickets = FakeTicketProvider::new();
        let connector = FakeConnector::new();
        let scheduler = ManualScheduler::new();
        let endpoints = EndpointBuilder::from_api_url(TEST_API_URL).expect("valid test origin");

        let manager = ConnectionManager::new(
            Arc::new(tickets.clone()),
            Arc::new(connector.clone()),
            endpoints,
            Arc::new(scheduler.clone()),
            policy,
        );

        Self {
            manager,
            tickets,
            connector,
            scheduler,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Yield to spawned tasks until `condition` holds
///
/// # Panics
///
/// Panics if the condition does not hold after 1000 yields.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
