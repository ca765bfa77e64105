//! Backend configuration
//!
//! Maps backend identifiers to request-per-minute capacities and names the
//! backends each pipeline role dispatches to. Credentials come from the
//! environment; everything else has static defaults tuned for OpenRouter
//! free-tier and Gemini preview limits.

use std::collections::HashMap;
use std::env;

/// Complexity tiers for the simplified routing variant, cheapest first.
pub const TIER_MODELS: [&str; 5] = [
    "meta-llama/llama-3.2-3b-instruct:free",
    "mistralai/mistral-nemo",
    "meta-llama/llama-3.3-70b-instruct",
    "anthropic/claude-3.5-sonnet",
    "gemini-3-pro-preview",
];

/// Planner, meta-judge and report writer share the 405B backend.
pub const PLANNER_MODEL: &str = "meta-llama/llama-3.1-405b-instruct";

/// Executor stays on the 70B backend for tool-directive handling.
pub const EXECUTOR_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

/// Three diverse workers for the ensemble fan-out.
pub const ENSEMBLE_WORKERS: [&str; 3] = [
    "meta-llama/llama-3.3-70b-instruct",
    "qwen/qwen-2.5-72b-instruct",
    "mistralai/mixtral-8x22b-instruct",
];

/// The streaming deep-think backend (Google native, not OpenRouter).
pub const DEEP_THINK_MODEL: &str = "gemini-3-pro-preview";

/// Backend identifiers, role assignments and rate capacities.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub planner: String,
    pub executor: String,
    pub writer: String,
    pub judge: String,
    pub ensemble_workers: Vec<String>,
    pub classifier: String,
    pub tiers: Vec<String>,
    pub deep_think: String,

    /// Requests-per-minute per backend identifier. A value <= 0 means
    /// unlimited; identifiers not listed fall back to `default_rpm`.
    pub rpm: HashMap<String, i64>,
    pub default_rpm: i64,

    pub openrouter_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub gemini_base_url: String,
}

impl BackendConfig {
    /// Build the default configuration, pulling credentials from env vars.
    pub fn from_env() -> Self {
        let mut rpm = HashMap::new();
        rpm.insert(TIER_MODELS[0].to_string(), 200);
        rpm.insert(TIER_MODELS[1].to_string(), 200);
        rpm.insert(TIER_MODELS[2].to_string(), 50);
        rpm.insert(TIER_MODELS[3].to_string(), 10);
        rpm.insert(TIER_MODELS[4].to_string(), 2);
        rpm.insert(PLANNER_MODEL.to_string(), 50);
        for worker in ENSEMBLE_WORKERS {
            rpm.entry(worker.to_string()).or_insert(50);
        }

        Self {
            planner: PLANNER_MODEL.to_string(),
            executor: EXECUTOR_MODEL.to_string(),
            writer: PLANNER_MODEL.to_string(),
            judge: PLANNER_MODEL.to_string(),
            ensemble_workers: ENSEMBLE_WORKERS.iter().map(|m| m.to_string()).collect(),
            classifier: TIER_MODELS[0].to_string(),
            tiers: TIER_MODELS.iter().map(|m| m.to_string()).collect(),
            deep_think: DEEP_THINK_MODEL.to_string(),
            rpm,
            default_rpm: 10,
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            gemini_api_key: env::var("GEMINI_API_KEY").ok(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Capacity for a backend identifier, falling back to the default for
    /// anything unlisted.
    pub fn rpm_for(&self, backend: &str) -> i64 {
        self.rpm.get(backend).copied().unwrap_or(self.default_rpm)
    }

    /// Backend identifier for an ordinal complexity tier (clamped to 1-5).
    pub fn tier_backend(&self, tier: u8) -> &str {
        let idx = (tier.clamp(1, 5) - 1) as usize;
        &self.tiers[idx]
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_fallback_for_unknown_backend() {
        let config = BackendConfig::from_env();
        assert_eq!(config.rpm_for("some/unlisted-model"), config.default_rpm);
        assert_eq!(config.rpm_for(DEEP_THINK_MODEL), 2);
    }

    #[test]
    fn test_tier_backend_clamps() {
        let config = BackendConfig::from_env();
        assert_eq!(config.tier_backend(0), TIER_MODELS[0]);
        assert_eq!(config.tier_backend(3), TIER_MODELS[2]);
        assert_eq!(config.tier_backend(9), TIER_MODELS[4]);
    }
}
