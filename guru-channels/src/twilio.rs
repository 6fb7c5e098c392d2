//! Twilio channel for guru-channels.
//!
//! Outbound replies go through the Programmable Messaging API. The optional
//! polling mode talks to the Conversations API. Inbound messages arrive on
//! the webhook as form posts, answered with TwiML.

use crate::message::OutgoingMessage;
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use guru_common::config::TwilioConfig;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.twilio.com";
const DEFAULT_CONVERSATIONS_URL: &str = "https://conversations.twilio.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Error code Twilio returns when the participant binding already exists.
pub const DUPLICATE_BINDING: u32 = 50416;

/// Error reported by the Twilio REST API.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Twilio API error {status}: {message}{}", code_suffix(.code))]
pub struct TwilioError {
    /// HTTP status
    pub status: u16,
    /// Twilio error code, when the body carried one
    pub code: Option<u32>,
    /// Error message
    pub message: String,
}

impl TwilioError {
    /// Whether this is the "binding already exists" error.
    pub fn is_duplicate_binding(&self) -> bool {
        self.code == Some(DUPLICATE_BINDING)
    }
}

fn code_suffix(code: &Option<u32>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

// ============================================================================
// Resources
// ============================================================================

/// A conversation in a Conversations service.
#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub sid: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// A participant bound to a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub sid: String,
}

/// A message posted to a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMessage {
    pub sid: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub index: u64,
}

#[derive(Debug, Deserialize)]
struct Created {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ConversationPage {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<ConversationMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u32>,
    message: Option<String>,
}

// ============================================================================
// Channel
// ============================================================================

/// Twilio channel authenticated with an API key.
pub struct TwilioChannel {
    client: Client,
    account_sid: String,
    api_key_sid: String,
    api_key_secret: String,
    from: String,
    chat_service_sid: Option<String>,
    api_base_url: String,
    conversations_base_url: String,
}

impl TwilioChannel {
    /// Create a new Twilio channel sending from `from` (e.g. `whatsapp:+14155238886`).
    pub fn new(
        account_sid: impl Into<String>,
        api_key_sid: impl Into<String>,
        api_key_secret: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            client: build_client(DEFAULT_TIMEOUT),
            account_sid: account_sid.into(),
            api_key_sid: api_key_sid.into(),
            api_key_secret: api_key_secret.into(),
            from: from.into(),
            chat_service_sid: None,
            api_base_url: DEFAULT_API_URL.to_string(),
            conversations_base_url: DEFAULT_CONVERSATIONS_URL.to_string(),
        }
    }

    /// Create a channel from configuration. Missing credentials leave it unconfigured.
    pub fn from_config(config: &TwilioConfig) -> Self {
        let channel = Self::new(
            config.account_sid.clone().unwrap_or_default(),
            config.api_key_sid.clone().unwrap_or_default(),
            config.api_key_secret.clone().unwrap_or_default(),
            config.proxy_address.clone().unwrap_or_default(),
        )
        .with_base_urls(&config.api_base_url, &config.conversations_base_url)
        .with_timeout(Duration::from_secs(config.timeout_secs));

        match &config.chat_service_sid {
            Some(sid) => channel.with_chat_service(sid.clone()),
            None => channel,
        }
    }

    /// Point the channel at different API hosts.
    pub fn with_base_urls(mut self, api: &str, conversations: &str) -> Self {
        self.api_base_url = api.trim_end_matches('/').to_string();
        self.conversations_base_url = conversations.trim_end_matches('/').to_string();
        self
    }

    /// Bound every Twilio request to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    /// Set the Conversations service used by the conversation calls.
    pub fn with_chat_service(mut self, sid: impl Into<String>) -> Self {
        self.chat_service_sid = Some(sid.into());
        self
    }

    /// Whether credentials and a sender address are present.
    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty()
            && !self.api_key_sid.is_empty()
            && !self.api_key_secret.is_empty()
            && !self.from.is_empty()
    }

    /// Address replies are sent from.
    pub fn from_address(&self) -> &str {
        &self.from
    }

    fn require_configured(&self) -> ChannelResult<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ChannelError::NotReady(
                "Twilio credentials or sender address missing".into(),
            ))
        }
    }

    fn service_url(&self, path: &str) -> ChannelResult<String> {
        self.require_configured()?;
        let service = self
            .chat_service_sid
            .as_deref()
            .ok_or_else(|| ChannelError::NotReady("Conversations service SID missing".into()))?;
        Ok(format!(
            "{}/v1/Services/{}/{}",
            self.conversations_base_url, service, path
        ))
    }

    async fn check(response: Response) -> ChannelResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorBody>(&body).ok();
        let code = parsed.as_ref().and_then(|b| b.code);
        let message = parsed.and_then(|b| b.message).unwrap_or(body);

        Err(TwilioError {
            status: status.as_u16(),
            code,
            message,
        }
        .into())
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: Response) -> ChannelResult<T> {
        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse Twilio response: {e}")))
    }

    /// Send one message through the Messaging API. Returns the message SID.
    pub async fn send_message(&self, to: &str, body: &str) -> ChannelResult<String> {
        self.require_configured()?;
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url, self.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio send error: {e}")))?;

        let created: Created = Self::read(response).await?;
        tracing::info!(sid = %created.sid, to = %to, chars = body.chars().count(), "Twilio message sent");
        Ok(created.sid)
    }

    /// Create a conversation with the given friendly name.
    pub async fn create_conversation(&self, friendly_name: &str) -> ChannelResult<Conversation> {
        let url = self.service_url("Conversations")?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&[("FriendlyName", friendly_name)])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio request error: {e}")))?;

        let conversation: Conversation = Self::read(response).await?;
        tracing::info!(sid = %conversation.sid, name = %friendly_name, "Conversation created");
        Ok(conversation)
    }

    /// Find a conversation by friendly name (first page only).
    pub async fn find_conversation_by_name(&self, name: &str) -> ChannelResult<Option<Conversation>> {
        let url = self.service_url("Conversations")?;

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .query(&[("PageSize", "100")])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio request error: {e}")))?;

        let page: ConversationPage = Self::read(response).await?;
        Ok(page
            .conversations
            .into_iter()
            .find(|c| c.friendly_name.as_deref() == Some(name)))
    }

    /// Reuse the conversation named `name`, or create it.
    pub async fn ensure_conversation(&self, name: &str) -> ChannelResult<Conversation> {
        if let Some(existing) = self.find_conversation_by_name(name).await? {
            tracing::info!(sid = %existing.sid, "Reusing existing conversation");
            return Ok(existing);
        }
        self.create_conversation(name).await
    }

    /// Bind `address` to a conversation through `proxy_address`.
    pub async fn add_participant(
        &self,
        conversation_sid: &str,
        address: &str,
        proxy_address: &str,
    ) -> ChannelResult<Participant> {
        let url = self.service_url(&format!("Conversations/{conversation_sid}/Participants"))?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&[
                ("MessagingBinding.Address", address),
                ("MessagingBinding.ProxyAddress", proxy_address),
            ])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio request error: {e}")))?;

        Self::read(response).await
    }

    /// Bind `address` to the conversation through this channel's sender
    /// address. An existing binding is not an error.
    pub async fn ensure_participant(&self, conversation_sid: &str, address: &str) -> ChannelResult<()> {
        match self.add_participant(conversation_sid, address, &self.from).await {
            Ok(participant) => {
                tracing::info!(sid = %participant.sid, address = %address, "Participant added");
                Ok(())
            }
            Err(ChannelError::Provider(e)) if e.is_duplicate_binding() => {
                tracing::info!(address = %address, "Participant binding already exists, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Most recent `limit` messages of a conversation, oldest first.
    pub async fn list_messages(
        &self,
        conversation_sid: &str,
        limit: u32,
    ) -> ChannelResult<Vec<ConversationMessage>> {
        let url = self.service_url(&format!("Conversations/{conversation_sid}/Messages"))?;
        let page_size = limit.to_string();

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .query(&[("Order", "desc"), ("PageSize", page_size.as_str())])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio request error: {e}")))?;

        let page: MessagePage = Self::read(response).await?;
        let mut messages = page.messages;
        messages.sort_by_key(|m| m.index);
        Ok(messages)
    }

    /// Post a message into a conversation. Returns the message SID.
    pub async fn post_conversation_message(
        &self,
        conversation_sid: &str,
        author: &str,
        body: &str,
    ) -> ChannelResult<String> {
        let url = self.service_url(&format!("Conversations/{conversation_sid}/Messages"))?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .form(&[("Author", author), ("Body", body)])
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Twilio request error: {e}")))?;

        let created: Created = Self::read(response).await?;
        Ok(created.sid)
    }
}

#[async_trait]
impl Channel for TwilioChannel {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        if message.recipient.is_empty() {
            return Err(ChannelError::InvalidMessage("Recipient is empty".into()));
        }
        if message.text.is_empty() {
            return Err(ChannelError::InvalidMessage("Message body is empty".into()));
        }
        self.send_message(&message.recipient, &message.text).await
    }

    async fn health_check(&self) -> ChannelResult<()> {
        self.require_configured()?;
        let url = format!(
            "{}/2010-04-01/Accounts/{}.json",
            self.api_base_url, self.account_sid
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key_sid, Some(&self.api_key_secret))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Health check failed: {e}")))?;

        Self::check(response).await.map(|_| ())
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

// ============================================================================
// Webhook helpers
// ============================================================================

/// A TwiML document answering with one message.
pub fn twiml_message(text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        html_escape::encode_text(text)
    )
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// First value of `key` in decoded form params.
pub fn form_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn signature_mac(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<Hmac<Sha1>> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(mac)
}

/// Compute the `X-Twilio-Signature` value for a form post to `url`.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    signature_mac(auth_token, url, params)
        .map(|mac| BASE64.encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Verify an `X-Twilio-Signature` header in constant time.
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Some(mac) = signature_mac(auth_token, url, params) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}
