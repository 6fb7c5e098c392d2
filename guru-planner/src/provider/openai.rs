//! OpenAI provider implementation.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// OpenAI API provider.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com", Duration::from_secs(60))
    }

    /// Create with custom base URL (for compatible APIs) and request timeout.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn error(model: &str, message: String, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: "openai".into(),
            model: model.to_string(),
            message,
            status_code,
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages: Vec<OpenAIMessage> = request
            .messages
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        if let Some(system) = &request.system {
            messages.insert(
                0,
                OpenAIMessage {
                    role: "system".into(),
                    content: system.clone(),
                },
            );
        }

        let openai_request = OpenAIRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Self::error(&request.model, format!("Request failed: {}", e), None))?;

        let status = response.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAIErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Self::error(
                &request.model,
                format!("API error: {}", message),
                Some(status.as_u16()),
            ));
        }

        let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
            Self::error(
                &request.model,
                format!("Failed to parse response: {}", e),
                None,
            )
        })?;

        let choice = openai_response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let finish_reason = choice.and_then(|c| c.finish_reason.clone());
        let usage = openai_response.usage.unwrap_or_default();

        Ok(ChatResponse {
            provider: "openai".into(),
            model: openai_response.model,
            content,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason,
            latency_ms,
        })
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("The user is in Paris.")],
            max_tokens: Some(800),
            temperature: Some(0.7),
            system: Some("You are a local dining expert.".into()),
        }
    }

    #[test]
    fn test_openai_request_serialization() {
        let request = OpenAIRequest {
            model: "gpt-4o".into(),
            messages: vec![
                OpenAIMessage {
                    role: "system".into(),
                    content: "Be helpful".into(),
                },
                OpenAIMessage {
                    role: "user".into(),
                    content: "Hello".into(),
                },
            ],
            max_tokens: Some(1000),
            temperature: Some(0.7),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gpt-4o"));
        assert!(json.contains("Be helpful"));
    }

    #[tokio::test]
    async fn test_chat_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 800,
                "messages": [
                    {"role": "system", "content": "You are a local dining expert."},
                    {"role": "user", "content": "The user is in Paris."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {"role": "assistant", "content": "Try Le Potager du Marais."},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
            })))
            .mount(&server)
            .await;

        let provider =
            OpenAIProvider::with_base_url("sk-test", server.uri(), Duration::from_secs(5));
        let response = provider.chat(request()).await.unwrap();
        assert_eq!(response.content, "Try Le Potager du Marais.");
        assert_eq!(response.usage.total_tokens, 28);
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_chat_api_error_extracts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::with_base_url("bad", server.uri(), Duration::from_secs(5));
        let err = provider.chat(request()).await.unwrap_err();
        assert_eq!(err.status_code, Some(401));
        assert_eq!(err.message, "API error: Incorrect API key provided");
    }
}
