//! Ticket Exchange
//!
//! The long-lived access token never travels in the handshake URL. Instead
//! it is exchanged for a short-lived, single-use ticket immediately before
//! every connection attempt, bounding the exposure of a leaked URL to the
//! ticket's few seconds of validity.
//!
//! # Protocol
//!
//! ```text
//! POST {api_url}{ticket_path}
//! Authorization: Bearer {access_token}
//!
//! 200 OK
//! { "ticket": "…", "expires_in": 10 }
//! ```
//!
//! `expires_in` is optional; tickets default to a 10 second lifetime.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::config::CourierConfig;

/// Lifetime assumed when the server does not report one
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(10);

/// Errors from the ticket exchange
#[derive(Debug, Error)]
pub enum TicketError {
    /// The ticket endpoint could not be reached
    #[error("ticket endpoint unreachable: {0}")]
    Unreachable(String),

    /// The ticket endpoint refused the access token
    #[error("ticket request rejected with status {status}")]
    Rejected {
        /// HTTP status returned by the endpoint
        status: u16,
    },

    /// The response did not contain a usable ticket
    #[error("malformed ticket response: {0}")]
    Malformed(String),
}

/// Long-lived access credential
///
/// Kept only so that reconnects can request fresh tickets.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the `Authorization` header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Single-use handshake credential
#[derive(Clone)]
pub struct Ticket {
    value: String,
    issued_at: DateTime<Utc>,
    ttl: Duration,
}

impl Ticket {
    /// A ticket issued now with the default lifetime
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self::issued_at(value, Utc::now(), DEFAULT_TICKET_TTL)
    }

    /// A ticket with an explicit issue time and lifetime
    #[must_use]
    pub fn issued_at(value: impl Into<String>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            issued_at,
            ttl,
        }
    }

    /// The raw ticket, for embedding in the handshake URL
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// When the ticket was received
    #[must_use]
    pub fn issued(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// How long the ticket stays valid after issue
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the ticket is past its lifetime at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // A lifetime past the calendar range never runs out
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .is_some_and(|expires_at| now >= expires_at)
    }

    /// Whether the ticket is past its lifetime now
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("value", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Exchanges an access token for a handshake ticket
#[async_trait]
pub trait TicketProvider: Send + Sync {
    /// Request a fresh single-use ticket
    async fn fetch_ticket(&self, token: &AccessToken) -> Result<Ticket, TicketError>;
}

/// Ticket endpoint response body
#[derive(Debug, Deserialize)]
struct TicketResponse {
    #[serde(default)]
    ticket: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TicketResponse {
    fn into_ticket(self) -> Result<Ticket, TicketError> {
        let value = self
            .ticket
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TicketError::Malformed("missing ticket".into()))?;
        let ttl = self
            .expires_in
            .map_or(DEFAULT_TICKET_TTL, Duration::from_secs);
        Ok(Ticket::issued_at(value, Utc::now(), ttl))
    }
}

/// Ticket provider backed by the REST API
#[derive(Clone, Debug)]
pub struct HttpTicketProvider {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpTicketProvider {
    /// Create a provider posting to `{api_url}{ticket_path}`
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Unreachable` if the HTTP client cannot be built.
    pub fn new(api_url: &str, ticket_path: &str, timeout: Duration) -> Result<Self, TicketError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}{}", api_url.trim_end_matches('/'), ticket_path),
            http_client,
        })
    }

    /// Create a provider from configuration
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Unreachable` if the HTTP client cannot be built.
    pub fn from_config(config: &CourierConfig) -> Result<Self, TicketError> {
        Self::new(&config.api_url, &config.ticket_path, config.request_timeout())
    }

    /// The full ticket endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TicketProvider for HttpTicketProvider {
    async fn fetch_ticket(&self, token: &AccessToken) -> Result<Ticket, TicketError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| TicketError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TicketError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TicketResponse = response
            .json()
            .await
            .map_err(|e| TicketError::Malformed(e.to_string()))?;

        body.into_ticket()
    }
}
