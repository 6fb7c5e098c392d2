//! Configuration management for Travel Guru services.
//!
//! The service reads an optional configuration file at
//! `~/.travel-guru/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Twilio
//! - `ACCOUNT_SID` → twilio.account_sid
//! - `API_KEY_SID` → twilio.api_key_sid
//! - `API_KEY_SECRET` → twilio.api_key_secret
//! - `TWILIO_AUTH_TOKEN` → twilio.auth_token
//! - `TWILIO_WEBHOOK_URL` → twilio.webhook_url
//! - `CHAT_SERVICE_SID` → twilio.chat_service_sid
//! - `USER_PHONE` → twilio.user_address
//! - `PROXY_PHONE` → twilio.proxy_address
//!
//! ## Language model
//! - `OPENAI_API_KEY` → llm.api_key
//! - `OPENAI_MODEL` → llm.model
//!
//! ## Server and logging
//! - `GURU_BIND_ADDRESS` → server.bind
//! - `GURU_PORT` → server.port
//! - `GURU_LOG_LEVEL` → observability.log_level
//! - `GURU_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".travel-guru"),
        |dirs| dirs.home_dir().join(".travel-guru"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the Travel Guru service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Twilio messaging credentials and addresses
    #[serde(default)]
    pub twilio: TwilioConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Conversation state machine configuration
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Outbound delivery configuration
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Conversation polling configuration
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply process environment overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let twilio = &mut self.twilio;
        let secrets: [(&str, &mut Option<String>); 8] = [
            ("ACCOUNT_SID", &mut twilio.account_sid),
            ("API_KEY_SID", &mut twilio.api_key_sid),
            ("API_KEY_SECRET", &mut twilio.api_key_secret),
            ("TWILIO_AUTH_TOKEN", &mut twilio.auth_token),
            ("TWILIO_WEBHOOK_URL", &mut twilio.webhook_url),
            ("CHAT_SERVICE_SID", &mut twilio.chat_service_sid),
            ("USER_PHONE", &mut twilio.user_address),
            ("PROXY_PHONE", &mut twilio.proxy_address),
        ];
        for (key, slot) in secrets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }

        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }

        if let Some(bind) = lookup("GURU_BIND_ADDRESS") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("GURU_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid GURU_PORT"),
            }
        }

        if let Some(level) = lookup("GURU_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("GURU_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Twilio
// ============================================================================

/// Twilio credentials and messaging addresses.
///
/// Addresses use the Twilio WhatsApp form, e.g. `whatsapp:+15551234567`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    /// Account SID (`AC...`)
    #[serde(default)]
    pub account_sid: Option<String>,

    /// API key SID (`SK...`), used as the basic-auth user
    #[serde(default)]
    pub api_key_sid: Option<String>,

    /// API key secret, used as the basic-auth password
    #[serde(default)]
    pub api_key_secret: Option<String>,

    /// Account auth token. Enables webhook signature checks when set.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Public URL Twilio posts the webhook to (needed for signature checks)
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Conversations service SID (`IS...`)
    #[serde(default)]
    pub chat_service_sid: Option<String>,

    /// Sending address (the Twilio WhatsApp number)
    #[serde(default)]
    pub proxy_address: Option<String>,

    /// Address of the user the polling mode talks to
    #[serde(default)]
    pub user_address: Option<String>,

    /// REST API base URL
    #[serde(default = "default_twilio_api_url")]
    pub api_base_url: String,

    /// Conversations API base URL
    #[serde(default = "default_twilio_conversations_url")]
    pub conversations_base_url: String,

    /// Per-request timeout for Twilio API calls, in seconds
    #[serde(default = "default_twilio_timeout")]
    pub timeout_secs: u64,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            api_key_sid: None,
            api_key_secret: None,
            auth_token: None,
            webhook_url: None,
            chat_service_sid: None,
            proxy_address: None,
            user_address: None,
            api_base_url: default_twilio_api_url(),
            conversations_base_url: default_twilio_conversations_url(),
            timeout_secs: default_twilio_timeout(),
        }
    }
}

impl TwilioConfig {
    /// Whether the credentials needed to send messages are present.
    pub fn is_configured(&self) -> bool {
        self.account_sid.is_some()
            && self.api_key_sid.is_some()
            && self.api_key_secret.is_some()
            && self.proxy_address.is_some()
    }
}

// ============================================================================
// Language Model
// ============================================================================

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (OpenAI or a compatible endpoint)
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Maximum tokens in the answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Conversation state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Keyword that opens the service menu (matched case-insensitively)
    #[serde(default = "default_trigger_keyword")]
    pub trigger_keyword: String,

    /// Idle time after which a session is evicted
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// How often the eviction sweep runs
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            trigger_keyword: default_trigger_keyword(),
            session_ttl_secs: default_session_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Outbound delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Maximum characters per outbound message
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Pause before each chunk is sent, in milliseconds
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    /// Text of the synchronous webhook acknowledgment
    #[serde(default = "default_ack_text")]
    pub ack_text: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
            chunk_delay_ms: default_chunk_delay_ms(),
            ack_text: default_ack_text(),
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Conversation polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Run the polling task next to the webhook server
    #[serde(default)]
    pub enabled: bool,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Conversation friendly name; defaults to `Travel Guru <user address>`
    #[serde(default)]
    pub conversation_name: Option<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_poll_interval_ms(),
            conversation_name: None,
        }
    }
}

impl PollingConfig {
    /// Resolve the conversation friendly name for a user address.
    pub fn conversation_name_for(&self, user_address: &str) -> String {
        self.conversation_name
            .clone()
            .unwrap_or_else(|| format!("Travel Guru {user_address}"))
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to pin to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5001
}
fn default_twilio_api_url() -> String {
    "https://api.twilio.com".into()
}
fn default_twilio_conversations_url() -> String {
    "https://conversations.twilio.com".into()
}
fn default_twilio_timeout() -> u64 {
    15
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> i64 {
    800
}
fn default_temperature() -> f64 {
    0.7
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_trigger_keyword() -> String {
    "help".into()
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_max_message_len() -> usize {
    1000
}
fn default_chunk_delay_ms() -> u64 {
    2000
}
fn default_ack_text() -> String {
    "Processing your itinerary...".into()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
