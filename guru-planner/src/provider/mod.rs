//! Chat-completion provider abstraction.
//!
//! A finished trip form costs one request/response call. [`OpenAIProvider`]
//! talks to the OpenAI chat completions API or any compatible endpoint.

mod openai;

pub use openai::OpenAIProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used in user-facing error messages.
    fn name(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{provider}:{model}] {message}")]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// System prompt (if not in messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// A user-turn message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}
