//! Courier CLI
//!
//! Terminal client for the real-time transport. Connects with an access
//! token, prints every inbound message, notification and typing indicator
//! as a JSON line on stdout, and sends lines typed on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Notifications only
//! COURIER_ACCESS_TOKEN=... courier --api-url https://api.example.com
//!
//! # Join a conversation
//! courier --token ... --conversation 42
//!
//! # With verbose logging (logs go to stderr)
//! RUST_LOG=debug courier --token ...
//! ```
//!
//! # Commands
//!
//! - `/typing`: send a typing-start indicator
//! - `/stop`: send a typing-stop indicator
//! - `/state`: print the connection state
//! - `/quit`: disconnect and exit
//! - anything else: send as a chat message
//!
//! # Signals
//!
//! - SIGINT: disconnect and exit

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use courier_core::{
    load_unvalidated_config_from_path, ConfigSource, ConnectionManager, ConversationId,
    CourierConfig,
};

/// Real-time chat and notification client
#[derive(Debug, Parser)]
#[command(name = "courier", version, about)]
struct Args {
    /// Long-lived access token, exchanged for a handshake ticket on every connect
    #[arg(long, env = "COURIER_ACCESS_TOKEN", hide_env_values = true)]
    token: String,

    /// Conversation to join; omit for a notifications-only connection
    #[arg(long)]
    conversation: Option<String>,

    /// Backend HTTP origin, overriding config and environment
    #[arg(long)]
    api_url: Option<String>,

    /// Configuration file (default: ~/.config/courier/courier.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum consecutive reconnect attempts
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_effective_config(args: &Args) -> anyhow::Result<CourierConfig> {
    let path = args
        .config
        .clone()
        .or_else(courier_core::default_config_path);
    let mut config =
        load_unvalidated_config_from_path(path).context("failed to load configuration")?;

    if let Some(url) = &args.api_url {
        config.api_url.clone_from(url);
        config.source = ConfigSource::Cli;
    }
    if let Some(attempts) = args.max_reconnect_attempts {
        config.max_reconnect_attempts = attempts;
        config.source = ConfigSource::Cli;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_event(stream: &str, frame: &impl serde::Serialize) {
    match serde_json::to_string(&json!({ "stream": stream, "frame": frame })) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to render frame"),
    }
}

/// Run one stdin line; returns `false` when the user asked to quit
fn handle_line(manager: &ConnectionManager, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/typing" => {
            manager.start_typing(None);
        }
        "/stop" => {
            manager.stop_typing(None);
        }
        "/state" => {
            println!(
                "{}",
                json!({
                    "state": manager.state().to_string(),
                    "phase": format!("{:?}", manager.phase()),
                    "reconnect_attempts": manager.reconnect_attempts(),
                })
            );
        }
        text => {
            manager.send_message(text, None);
        }
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("courier={}", args.log_level).parse()?)
                .add_directive(format!("courier_core={}", args.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = load_effective_config(&args)?;
    info!(api_url = %config.api_url, source = ?config.source, "Configuration loaded");

    let manager =
        ConnectionManager::from_config(&config).context("failed to set up connection")?;

    let _subscriptions = [
        manager.subscribe_message(|frame| print_event("message", frame)),
        manager.subscribe_notification(|frame| print_event("notification", frame)),
        manager.subscribe_typing(|frame| print_event("typing", frame)),
    ];

    let conversation = args.conversation.as_deref().map(ConversationId::from);
    manager.connect(args.token.as_str(), conversation).await;
    if !manager.is_connected() {
        warn!("Initial connection failed; retrying in the background");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !handle_line(&manager, line.trim()) {
                    break;
                }
            }
        }
    }

    manager.disconnect();
    Ok(())
}
