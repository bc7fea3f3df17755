//! Courier Core - Real-Time Transport for the Recruitment Web Client
//!
//! This crate owns the single duplex connection between a client session and
//! the backend messaging service. Chat messages, typing indicators and
//! notifications are multiplexed over that one connection and fanned out to
//! independent subscriber registries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Consumers                               │
//! │     subscribe_message / subscribe_notification / subscribe_typing │
//! │        send_message / start_typing / stop_typing                  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                      ConnectionManager                            │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────┐  ┌────────────┐  │
//! │  │  Ticket    │  │  Endpoint    │  │ Connector │  │ Scheduler  │  │
//! │  │  Provider  │  │  Builder     │  │ (duplex)  │  │ (retries)  │  │
//! │  └────────────┘  └──────────────┘  └───────────┘  └────────────┘  │
//! │        inbound frame ──► classify ──► registry fan-out             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConnectionManager`]: connection lifecycle, reconnection and fan-out
//! - [`InboundFrame`] / [`OutboundFrame`]: the wire model
//! - [`SubscriberRegistry`] / [`Subscription`]: observer registries with disposers
//! - [`ReconnectPolicy`]: capped exponential backoff
//! - [`Scheduler`]: injected time source ([`TokioScheduler`], [`ManualScheduler`])
//! - [`TicketProvider`]: short-lived ticket exchange
//! - [`Connector`]: duplex transport seam
//!
//! # Quick Start
//!
//! ```ignore
//! use courier_core::{ConnectionManager, CourierConfig, ConversationId};
//!
//! let config = CourierConfig::from_env()?;
//! let manager = ConnectionManager::from_config(&config)?;
//!
//! let sub = manager.subscribe_message(|msg| println!("{:?}", msg.message));
//! manager.connect("access-token", Some(ConversationId::from("42"))).await;
//!
//! manager.send_message("hello", None);
//! sub.unsubscribe();
//! manager.disconnect();
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod endpoint;
pub mod frames;
pub mod manager;
pub mod reconnect;
pub mod registry;
pub mod test_utils;
pub mod ticket;
pub mod timer;
pub mod transport;

pub use config::{
    default_config_path, load_config, load_config_from_path, load_unvalidated_config_from_path,
    ConfigError, ConfigSource, CourierConfig,
};
pub use endpoint::{redact, EndpointBuilder, EndpointError};
pub use frames::{
    ChatMessage, ConversationId, FrameError, InboundFrame, Notification, NotificationEvent,
    OutboundFrame, StreamKind, TypingIndicator,
};
pub use manager::{ConnectionManager, ConnectionPhase, SetupError};
pub use reconnect::ReconnectPolicy;
pub use registry::{SubscriberRegistry, Subscription, SubscriptionId};
pub use ticket::{AccessToken, HttpTicketProvider, Ticket, TicketError, TicketProvider};
pub use timer::{ManualScheduler, Scheduler, TimerHandle, TimerTask, TokioScheduler};
pub use transport::{
    CloseInfo, Connector, LinkCommand, LinkHandle, LinkPeer, ReadyState, TransportError,
    TransportEvent, TransportLink,
};

#[cfg(feature = "websocket")]
pub use transport::websocket::WebSocketConnector;
