//! Guru Channels - Twilio WhatsApp front end for the Travel Guru planner.
//!
//! Inbound messages arrive on the Twilio webhook (or, optionally, through
//! the conversation poller), are answered by the planner, and the replies
//! go back out through the Twilio Messaging API in paced chunks.
//!
//! ```text
//! WhatsApp → Twilio → webhook → PlannerBridge → ConversationSession
//!                        ↓                            ↓
//!                   TwiML ack         User ← paced chunks ← reply
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bridge;
pub mod message;
pub mod outbound;
pub mod poller;
pub mod routes;
pub mod traits;
pub mod twilio;

// Re-export commonly used types
pub use bridge::PlannerBridge;
pub use message::{ChannelMessage, MessageSource, OutgoingMessage};
pub use outbound::{deliver_chunked, deliver_paced, split_message};
pub use poller::{ConversationPoller, PollerHandle};
pub use routes::{build_router, create_state, ChannelsState, SignatureConfig, HOME_TEXT};
pub use traits::{Channel, ChannelError, ChannelResult};
pub use twilio::{TwilioChannel, TwilioError};

use anyhow::Context;
use guru_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted webhook body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the channels router with CORS and body-limit middleware.
pub fn build_channels_router(
    config: &Config,
) -> (axum::Router, Arc<PlannerBridge>, Arc<TwilioChannel>) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let twilio = Arc::new(TwilioChannel::from_config(&config.twilio));
    if !twilio.is_configured() {
        tracing::warn!("Twilio is not fully configured; replies cannot be delivered");
    }

    let bridge = Arc::new(PlannerBridge::from_config(config, twilio.clone()));
    let state = create_state(bridge.clone(), config);
    if state.signature.is_none() {
        tracing::warn!("Twilio webhook signature verification is disabled");
    }

    let router = build_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors);

    (router, bridge, twilio)
}

/// Start the channels HTTP server, the session cleanup task, and the
/// conversation poller when enabled.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let ip = config
        .server
        .bind
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;
    let addr = SocketAddr::from((ip, config.server.port));

    let (router, bridge, twilio) = build_channels_router(config);

    // Spawn cleanup task for idle sessions
    let cleanup_handle = PlannerBridge::spawn_cleanup(
        bridge.clone(),
        Duration::from_secs(config.conversation.session_ttl_secs),
        Duration::from_secs(config.conversation.cleanup_interval_secs.max(1)),
    );

    let poller = if config.polling.enabled {
        let poller = ConversationPoller::connect(twilio, bridge.clone(), config)
            .await
            .context("Failed to set up the conversation poller")?;
        Some(poller.spawn())
    } else {
        None
    };

    tracing::info!("Starting Travel Guru channels on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Clean up on shutdown
    cleanup_handle.abort();
    if let Some(poller) = poller {
        poller.stop().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
