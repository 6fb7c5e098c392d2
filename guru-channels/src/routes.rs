//! HTTP routes for guru-channels.
//!
//! - `POST /webhook/whatsapp` (alias `/whatsapp-inbound`): Twilio inbound webhook
//! - `GET /`: plain-text liveness string
//! - `GET /health`, `GET /ready`: JSON health endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use guru_common::config::Config;
use guru_common::Error;
use serde::Serialize;
use std::sync::Arc;

use crate::bridge::PlannerBridge;
use crate::message::ChannelMessage;
use crate::twilio::{form_value, parse_form, twiml_message, verify_signature};

/// Text served on `GET /`.
pub const HOME_TEXT: &str = "Polling bot is running!";

// ============================================================================
// State
// ============================================================================

/// Shared state for the channels HTTP server.
pub struct ChannelsState {
    /// Planner bridge that answers and delivers
    pub bridge: Arc<PlannerBridge>,
    /// Text of the immediate TwiML acknowledgment
    pub ack_text: String,
    /// Webhook signature settings (if configured)
    pub signature: Option<SignatureConfig>,
}

/// Settings for `X-Twilio-Signature` verification.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// Twilio auth token used as the HMAC key
    pub auth_token: String,
    /// Public URL Twilio posts to, exactly as configured in the console
    pub webhook_url: String,
}

/// Create the shared state. Signatures are checked only when both the auth
/// token and the public webhook URL are configured.
pub fn create_state(bridge: Arc<PlannerBridge>, config: &Config) -> Arc<ChannelsState> {
    let signature = match (&config.twilio.auth_token, &config.twilio.webhook_url) {
        (Some(auth_token), Some(webhook_url)) => Some(SignatureConfig {
            auth_token: auth_token.clone(),
            webhook_url: webhook_url.clone(),
        }),
        _ => None,
    };

    Arc::new(ChannelsState {
        bridge,
        ack_text: config.outbound.ack_text.clone(),
        signature,
    })
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<usize>,
}

impl HealthResponse {
    fn new(status: &'static str) -> Self {
        Self {
            status,
            service: "guru-channels",
            version: env!("CARGO_PKG_VERSION"),
            sessions: None,
        }
    }
}

// ============================================================================
// Health Routes
// ============================================================================

async fn home() -> &'static str {
    HOME_TEXT
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse::new("healthy"))
}

async fn ready(State(state): State<Arc<ChannelsState>>) -> impl IntoResponse {
    let sessions = Some(state.bridge.store().len());

    match state.bridge.channel().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                sessions,
                ..HealthResponse::new("ready")
            }),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "Channel not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    sessions,
                    ..HealthResponse::new("not_ready")
                }),
            )
        }
    }
}

// ============================================================================
// WhatsApp Webhook
// ============================================================================

/// POST /webhook/whatsapp: Twilio inbound message
async fn whatsapp_webhook(
    State(state): State<Arc<ChannelsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = parse_form(&body);

    if let Some(ref signature) = state.signature {
        let provided = headers
            .get("X-Twilio-Signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_signature(&signature.auth_token, &signature.webhook_url, &params, provided) {
            tracing::warn!(
                "Twilio webhook signature verification failed (signature: {})",
                if provided.is_empty() { "missing" } else { "invalid" }
            );
            return reject(Error::Unauthorized("Invalid signature".into()));
        }
    }

    let Some(from) = form_value(&params, "From")
        .map(str::trim)
        .filter(|f| !f.is_empty())
    else {
        return reject(Error::BadRequest("Missing From".into()));
    };

    let body_text = form_value(&params, "Body").unwrap_or_default();
    let message_sid = form_value(&params, "MessageSid").map(str::to_string);
    let message = ChannelMessage::from_webhook(message_sid, from, body_text);

    tracing::info!(
        trace_id = %message.trace_id,
        sender = %message.sender,
        text = %message.preview(),
        "WhatsApp message received"
    );

    state.bridge.dispatch(message);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        twiml_message(&state.ack_text),
    )
        .into_response()
}

fn reject(err: Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the channels HTTP router.
pub fn build_router(state: Arc<ChannelsState>) -> Router {
    Router::new()
        .route("/", get(home))
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Twilio webhook
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/whatsapp-inbound", post(whatsapp_webhook))
        .with_state(state)
}
