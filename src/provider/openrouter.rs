//! Synchronous chat-completion backend (OpenRouter)
//!
//! One HTTP request, one JSON response. Uses a long-lived reqwest::Client
//! for connection pooling.

use super::ProviderResult;
use crate::error::ProviderError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

const MAX_OUTPUT_TOKENS: u32 = 1000;

pub struct OpenRouterBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: Option<String>, base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// Single-shot chat completion against `model`.
    pub async fn chat_completion(&self, prompt: &str, model: &str) -> ProviderResult {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::AuthMissing("OPENROUTER_API_KEY not configured".to_string())
            })?;

        let request = ChatCompletionRequest {
            model: model.to_string(),
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://localhost:3000")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %model, "OpenRouter request failed: {}", e);
                ProviderError::Network(format!("OpenRouter connection error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || body.contains("RESOURCE_EXHAUSTED") {
                return Err(ProviderError::RateLimited(format!(
                    "OpenRouter {}: {}",
                    status, body
                )));
            }
            error!(model = %model, status = status.as_u16(), "OpenRouter error response");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("OpenRouter parse error: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::MalformedResponse("No choices in completion".to_string())
            })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "What changed in TCS margins?".to_string(),
            }],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"max_tokens\":1000"));
        assert!(json.contains("What changed in TCS margins?"));
    }

    #[test]
    fn test_response_extraction() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"answer"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "answer");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_network_call() {
        let backend = OpenRouterBackend::new(None, "http://localhost:0".to_string());
        let err = backend.chat_completion("hi", "model-x").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthMissing(_)));
    }
}
