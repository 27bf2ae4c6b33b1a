//! Generic HTTP provider for OpenAI-compatible `/chat/completions` APIs.
//!
//! One implementation covers every backend speaking this dialect; the
//! provider name and endpoint come from configuration.

use async_trait::async_trait;
use tracing::debug;

use aeon_core::config::schema::ProviderSettings;
use aeon_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionRequest, CompletionResponse, Message,
};

use crate::error::ProviderError;
use crate::traits::Provider;

/// Default tokens-to-generate ceiling per request.
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// A provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    client: reqwest::Client,
    name: String,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider from its config entry.
    pub fn new(name: &str, settings: &ProviderSettings, timeout_secs: u64) -> Self {
        let api_base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            name: name.to_string(),
            api_base,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Message::system(&request.system));
        messages.extend(request.messages.iter().cloned());

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.clone())
        };

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: Some(DEFAULT_TEMPERATURE),
        };

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = body.messages.len(),
            "calling provider"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("{}: request deadline exceeded", self.name))
                } else {
                    ProviderError::Timeout(format!("{}: {e}", self.name))
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Server(format!("reading response body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::from_status(status, &text));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Server(format!("unparseable response: {e}")))?;

        Ok(parsed.into())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        let settings = ProviderSettings {
            api_key: "sk-test-key".into(),
            api_base: Some(server.uri()),
            model: "test-model".into(),
        };
        HttpProvider::new("mock", &settings, 5)
    }

    fn request_with_system(system: &str) -> CompletionRequest {
        CompletionRequest {
            system: system.into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "content": "Hello!", "tool_calls": null },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7 }
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let resp = provider
            .complete(&request_with_system("You are a test."))
            .await
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("Hello!"));
        assert_eq!(resp.usage.unwrap().total_tokens, 7);
    }

    #[tokio::test]
    async fn test_tool_call_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "tc_1",
                            "type": "function",
                            "function": { "name": "exec", "arguments": "{\"command\":\"ls\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let resp = provider.complete(&request_with_system("s")).await.unwrap();

        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].id, "tc_1");
        assert_eq!(resp.tool_calls[0].function.name, "exec");
    }

    #[tokio::test]
    async fn test_rate_limit_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.complete(&request_with_system("s")).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_auth_error_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.complete(&request_with_system("s")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_garbage_body_is_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.complete(&request_with_system("s")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Server(_)));
    }

    #[test]
    fn test_availability_tracks_api_key() {
        let with_key = ProviderSettings {
            api_key: "sk-x".into(),
            api_base: None,
            model: "m".into(),
        };
        let without_key = ProviderSettings::default();

        assert!(HttpProvider::new("a", &with_key, 5).available());
        assert!(!HttpProvider::new("b", &without_key, 5).available());
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let settings = ProviderSettings {
            api_key: "k".into(),
            api_base: Some("https://api.example.com/v1/".into()),
            model: "m".into(),
        };
        let provider = HttpProvider::new("x", &settings, 5);
        assert_eq!(
            provider.completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
