//! Complexity-tier task router
//!
//! The simplified routing mode: one fast classification call assigns the
//! whole task an ordinal complexity tier, and the task is dispatched to
//! exactly one backend chosen by tier. Skips planning, approval and the
//! execution loop entirely; a degenerate single-step use of the same
//! provider and governor machinery.

use crate::config::BackendConfig;
use crate::provider::{render_in_band, Provider};
use std::sync::Arc;
use tracing::info;

const DEFAULT_TIER: u8 = 3;

const ROUTER_PROMPT: &str = r#"You are a Compute Resource Allocator. Analyze the user query and assign a Complexity Level (1-5).

DEFINITIONS:
Level 1: Simple formatting, spelling fix, data extraction.
Level 2: Routine questions, simple summaries, known facts, "what is X".
Level 3: Comparative analysis, code generation, intermediate reasoning, "Compare X and Y".
Level 4: Strategic planning, complex synthesis, multi-step logic.
Level 5: Deep research, novel discovery, extremely complex financial forecasting, requires "thinking".

QUERY: {query}

Reply ONLY with the single integer number (1, 2, 3, 4, or 5). Do not write anything else.
"#;

/// Parse the classifier's reply into a tier, clamped to [1, 5].
///
/// In-band error strings and non-numeric replies fall back to the
/// intermediate tier.
fn parse_tier(reply: &str) -> u8 {
    if reply.contains("Error") {
        return DEFAULT_TIER;
    }
    reply
        .trim()
        .parse::<i64>()
        .map(|level| level.clamp(1, 5) as u8)
        .unwrap_or(DEFAULT_TIER)
}

pub struct TaskRouter {
    provider: Arc<dyn Provider>,
    config: Arc<BackendConfig>,
}

impl TaskRouter {
    pub fn new(provider: Arc<dyn Provider>, config: Arc<BackendConfig>) -> Self {
        Self { provider, config }
    }

    /// Classify `query` into a complexity tier using the fast classifier
    /// backend.
    pub async fn classify(&self, query: &str) -> u8 {
        let prompt = ROUTER_PROMPT.replace("{query}", query);
        let reply = render_in_band(self.provider.call(&prompt, &self.config.classifier).await);
        parse_tier(&reply)
    }

    /// Classify and dispatch the whole task to the tier's backend.
    pub async fn route(&self, query: &str) -> String {
        let tier = self.classify(query).await;
        let backend = self.config.tier_backend(tier).to_string();
        info!(tier, backend = %backend, "Router decision");

        render_in_band(self.provider.call(query, &backend).await)
    }
}
