//! Handshake Endpoint Construction
//!
//! The duplex endpoint is derived from the backend's HTTP origin by swapping
//! the scheme for its WebSocket equivalent, then appending either the
//! notifications route or a conversation-scoped chat route:
//!
//! ```text
//! http://api.example.com   ──►  ws://api.example.com/ws/notifications/?ticket=…
//! https://api.example.com  ──►  wss://api.example.com/ws/chat/{conversation}/?ticket=…
//! ```
//!
//! The ticket travels as a query credential; it is single-use and expires
//! within seconds. Use [`redact`] whenever an endpoint is logged.

use reqwest::Url;
use thiserror::Error;

use crate::frames::ConversationId;
use crate::ticket::Ticket;

/// Errors building the duplex endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The configured API origin is not a valid URL
    #[error("invalid API URL {url:?}: {reason}")]
    InvalidApiUrl {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The API origin uses a scheme with no duplex equivalent
    #[error("unsupported scheme {0:?}; expected http, https, ws or wss")]
    UnsupportedScheme(String),
}

/// Builds handshake endpoints from the configured API origin
#[derive(Clone, Debug)]
pub struct EndpointBuilder {
    base: Url,
}

impl EndpointBuilder {
    /// Derive the duplex base from an HTTP(S) API origin
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; `ws`/`wss` origins are
    /// used as-is. Any query or fragment on the origin is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or has another scheme.
    pub fn from_api_url(api_url: &str) -> Result<Self, EndpointError> {
        let mut base = Url::parse(api_url.trim()).map_err(|e| EndpointError::InvalidApiUrl {
            url: api_url.to_string(),
            reason: e.to_string(),
        })?;

        let duplex_scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        if base.scheme() != duplex_scheme {
            base.set_scheme(duplex_scheme)
                .map_err(|()| EndpointError::InvalidApiUrl {
                    url: api_url.to_string(),
                    reason: format!("cannot switch scheme to {duplex_scheme}"),
                })?;
        }

        if base.cannot_be_a_base() {
            return Err(EndpointError::InvalidApiUrl {
                url: api_url.to_string(),
                reason: "URL cannot be used as a base".into(),
            });
        }

        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    /// The duplex base URL (`ws://` or `wss://`)
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Notifications-only endpoint: `{base}/ws/notifications/?ticket={ticket}`
    #[must_use]
    pub fn notifications(&self, ticket: &Ticket) -> Url {
        self.build(&["ws", "notifications"], ticket)
    }

    /// Conversation-scoped endpoint: `{base}/ws/chat/{conversation}/?ticket={ticket}`
    #[must_use]
    pub fn chat(&self, conversation: &ConversationId, ticket: &Ticket) -> Url {
        self.build(&["ws", "chat", conversation.as_str()], ticket)
    }

    /// Pick the chat endpoint when a scope is present, notifications otherwise
    #[must_use]
    pub fn for_scope(&self, conversation: Option<&ConversationId>, ticket: &Ticket) -> Url {
        match conversation {
            Some(id) => self.chat(id, ticket),
            None => self.notifications(ticket),
        }
    }

    fn build(&self, segments: &[&str], ticket: &Ticket) -> Url {
        let mut url = self.base.clone();
        // Checked in `from_api_url`: the base always has path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url.query_pairs_mut().append_pair("ticket", ticket.expose());
        url
    }
}

/// Render an endpoint without its query string
#[must_use]
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
