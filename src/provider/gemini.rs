//! Streaming deep-think backend (Gemini)
//!
//! Opens a streaming generate-content session with the Google Search tool
//! attached and intermediate reasoning enabled, then concatenates the text
//! chunks in arrival order into the final return value.

use super::ProviderResult;
use crate::error::ProviderError;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};

pub struct GeminiBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiBackend {
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

    /// Stream a deep-think response for `prompt` and return the full
    /// concatenated text.
    pub async fn stream_completion(&self, prompt: &str, model: &str) -> ProviderResult {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::AuthMissing("GEMINI_API_KEY not configured".to_string())
            })?;

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            tools: vec![ToolSpec {
                google_search: GoogleSearch {},
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    include_thoughts: true,
                },
                response_modalities: vec!["TEXT".to_string()],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %model, "Gemini request failed: {}", e);
                ProviderError::Network(format!("Gemini connection error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || body.contains("RESOURCE_EXHAUSTED") {
                return Err(ProviderError::RateLimited(format!(
                    "Gemini {}: {}",
                    status, body
                )));
            }
            error!(model = %model, status = status.as_u16(), "Gemini error response");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let byte_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let mut events = Box::pin(byte_stream.eventsource());

        let mut full_response = String::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event.data == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => {
                            for candidate in &chunk.candidates {
                                for part in &candidate.content.parts {
                                    full_response.push_str(&part.text);
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Skipping unparseable stream chunk: {}", e);
                        }
                    }
                }
                Err(e) => {
                    return Err(ProviderError::Network(format!("Gemini stream error: {}", e)));
                }
            }
        }

        if full_response.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "Empty response from Gemini stream".to_string(),
            ));
        }

        Ok(full_response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    tools: Vec<ToolSpec>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
    response_modalities: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_enables_search_and_thinking() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: "Forecast gold demand".to_string(),
                }],
            }],
            tools: vec![ToolSpec {
                google_search: GoogleSearch {},
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    include_thoughts: true,
                },
                response_modalities: vec!["TEXT".to_string()],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"google_search\":{}"));
        assert!(json.contains("\"includeThoughts\":true"));
        assert!(json.contains("\"responseModalities\":[\"TEXT\"]"));
    }

    #[test]
    fn test_chunk_text_extraction() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"partial "},{"text":"answer"}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let text: String = chunk
            .candidates
            .iter()
            .flat_map(|c| c.content.parts.iter())
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(text, "partial answer");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_network_call() {
        let backend = GeminiBackend::new(
            Some(String::new()),
            "http://localhost:0".to_string(),
        );
        let err = backend
            .stream_completion("hi", "gemini-3-pro-preview")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthMissing(_)));
    }
}
