//! The language-model call that answers a completed trip form.

use crate::provider::{ChatRequest, Message, OpenAIProvider, Provider};
use crate::query::TripQuery;
use guru_common::config::LlmConfig;
use std::sync::Arc;
use std::time::Duration;

/// Sends trip queries to a provider with fixed sampling settings.
///
/// Failures are not retried. They come back as a user-facing
/// `Error fetching data from <provider>: <message>` string.
#[derive(Clone)]
pub struct TripAdvisor {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: i64,
    temperature: f64,
    timeout: Duration,
}

impl TripAdvisor {
    /// Create an advisor around any provider.
    pub fn new(provider: Arc<dyn Provider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Create an advisor backed by the OpenAI provider described in `config`.
    pub fn from_config(config: &LlmConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("No language-model API key configured; answers will fail");
        }
        let provider = OpenAIProvider::with_base_url(
            config.api_key.clone().unwrap_or_default(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        Self::new(Arc::new(provider), config)
    }

    /// Ask the model and return its answer, or the error text to show the user.
    pub async fn ask(&self, query: &TripQuery) -> String {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(query.user.clone())],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system: Some(query.system.clone()),
        };

        let result = tokio::time::timeout(self.timeout, self.provider.chat(request)).await;

        match result {
            Ok(Ok(response)) => {
                tracing::info!(
                    model = %response.model,
                    latency_ms = response.latency_ms,
                    output_tokens = response.usage.output_tokens,
                    "Trip answer received"
                );
                response.content.trim().to_string()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Language-model call failed");
                self.failure(&e.message)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Language-model call timed out");
                self.failure(&format!("request timed out after {}s", self.timeout.as_secs()))
            }
        }
    }

    fn failure(&self, message: &str) -> String {
        format!("Error fetching data from {}: {}", self.provider.name(), message)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted provider shared by the planner's tests.

    use crate::provider::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct ScriptedProvider {
        pub reply: Result<String, String>,
        pub delay: Option<Duration>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        pub fn answering(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "OpenAI"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(ChatResponse {
                    provider: "scripted".into(),
                    model: request.model,
                    content: text.clone(),
                    usage: TokenUsage::default(),
                    finish_reason: Some("stop".into()),
                    latency_ms: 1,
                }),
                Err(message) => Err(ProviderError {
                    provider: "scripted".into(),
                    model: request.model,
                    message: message.clone(),
                    status_code: Some(500),
                }),
            }
        }
    }
}
