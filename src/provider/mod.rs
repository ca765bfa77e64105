//! Uniform call interface over heterogeneous model backends
//!
//! Two backend families sit behind one `Provider` trait: a synchronous
//! chat-completion API (OpenRouter) and a streaming deep-think API
//! (Gemini). Every call is admitted through the shared [`RateGovernor`]
//! under the same backend identifier used for dispatch.

pub mod gemini;
pub mod openrouter;

pub use gemini::GeminiBackend;
pub use openrouter::OpenRouterBackend;

use crate::config::BackendConfig;
use crate::error::ProviderError;
use crate::governor::RateGovernor;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type ProviderResult = std::result::Result<String, ProviderError>;

/// Text-in/text-out model backend seam.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(&self, prompt: &str, backend: &str) -> ProviderResult;
}

/// Render a provider result into the text slot a success would occupy.
///
/// This is the degrade-and-continue decision point: a call site that wants
/// the workflow to keep moving applies this instead of propagating.
pub fn render_in_band(result: ProviderResult) -> String {
    match result {
        Ok(text) => text,
        Err(e) => format!("Error: {}", e),
    }
}

const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;

/// Linearly increasing backoff for rate-limit retries.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(15 * (attempt as u64 + 1))
}

/// Gateway dispatching prompts to the backend family named by the
/// identifier, with governor admission and bounded rate-limit retries.
pub struct ProviderGateway {
    openrouter: OpenRouterBackend,
    gemini: GeminiBackend,
    governor: Arc<RateGovernor>,
    config: Arc<BackendConfig>,
}

impl ProviderGateway {
    pub fn new(config: Arc<BackendConfig>, governor: Arc<RateGovernor>) -> Self {
        Self {
            openrouter: OpenRouterBackend::new(
                config.openrouter_api_key.clone(),
                config.openrouter_base_url.clone(),
            ),
            gemini: GeminiBackend::new(
                config.gemini_api_key.clone(),
                config.gemini_base_url.clone(),
            ),
            governor,
            config,
        }
    }

    async fn dispatch(&self, prompt: &str, backend: &str) -> ProviderResult {
        if backend == self.config.deep_think {
            self.gemini.stream_completion(prompt, backend).await
        } else {
            self.openrouter.chat_completion(prompt, backend).await
        }
    }
}

#[async_trait]
impl Provider for ProviderGateway {
    async fn call(&self, prompt: &str, backend: &str) -> ProviderResult {
        self.governor
            .admit(backend, self.config.rpm_for(backend))
            .await;

        info!(backend = %backend, "Invoking model backend");

        let mut last_err = None;
        for attempt in 0..MAX_RATE_LIMIT_ATTEMPTS {
            match self.dispatch(prompt, backend).await {
                Ok(text) => return Ok(text),
                Err(ProviderError::RateLimited(detail)) => {
                    let wait = backoff_delay(attempt);
                    warn!(
                        backend = %backend,
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs(),
                        "Backend rate limited, backing off"
                    );
                    last_err = Some(ProviderError::RateLimited(detail));
                    if attempt + 1 < MAX_RATE_LIMIT_ATTEMPTS {
                        tokio::time::sleep(wait).await;
                    }
                }
                // Auth, network and response-shape failures are not worth
                // retrying; the caller decides whether to degrade.
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("retry loop exits with an error"))
    }
}

/// Scripted provider for development and testing.
///
/// Plays back a fixed queue of results and records every call, keeping the
/// pipeline functional without any network dependency.
pub struct ScriptedProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<ProviderResult>>,
    calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResult>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every `(backend, prompt)` pair seen so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn call(&self, prompt: &str, backend: &str) -> ProviderResult {
        self.calls
            .lock()
            .expect("calls lock")
            .push((backend.to_string(), prompt.to_string()));

        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Ok(format!("scripted response from {}", backend)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_in_band_preserves_success_text() {
        assert_eq!(render_in_band(Ok("fine".to_string())), "fine");
    }

    #[test]
    fn test_render_in_band_encodes_errors_with_status() {
        let rendered = render_in_band(Err(ProviderError::Http {
            status: 502,
            body: "upstream unavailable".to_string(),
        }));
        assert_eq!(rendered, "Error: 502: upstream unavailable");
    }

    #[test]
    fn test_backoff_grows_linearly() {
        assert_eq!(backoff_delay(0), Duration::from_secs(15));
        assert_eq!(backoff_delay(1), Duration::from_secs(30));
        assert_eq!(backoff_delay(2), Duration::from_secs(45));
    }
}
