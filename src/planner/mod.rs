//! Research planner
//!
//! Turns a task plus background context into an ordered step list via the
//! planner backend, with repair retries for free-text output and a
//! deterministic fallback. The worst-case result is always a valid,
//! non-empty plan; this module never errors past its own boundary.

use crate::error::{OrchestrationError, Result};
use crate::provider::Provider;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_PARSE_ATTEMPTS: u32 = 3;
const BACKGROUND_CAP: usize = 20_000;

const PLANNER_PROMPT: &str = r#"You are a Principal Financial Research Architect conducting deep research.

Your plans drive an agent that can:
- Execute extensive research loops (5-10+ distinct actions for complex queries)
- Synthesize information from diverse financial sources
- Adapt queries based on intermediate findings

BACKGROUND RESEARCH COMPLETED:
{background}

USER QUERY: "{task}"

PLANNING PHILOSOPHY:
1. INITIAL EXPLORATION: Start broad
2. ITERATIVE DEEPENING: Each finding informs the next query
3. SOURCE DIVERSIFICATION: Web search, financial APIs, multi-model analysis

AVAILABLE TOOLS:
- web_search(query), company_fundamentals(ticker), historical_performance(tickers, period)
- ensemble_query(query)

OUTPUT FORMAT:
Return ONLY a valid JSON array of sequential step strings. Do not add markdown blocks like ```json.
Example:
["web_search TCS.NS latest results", "company_fundamentals TCS.NS", "Compare margins to peers via ensemble_query", "Synthesize report"]
"#;

/// Strip common markdown code-fence markers from model output.
fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Extract an ordered step list from free-form model text.
///
/// Cleans fence markers, slices the first `[` to the last `]`, then parses
/// the slice as a JSON string array.
pub fn parse_steps(raw: &str) -> Result<Vec<String>> {
    let cleaned = strip_code_fences(raw);

    let sliced = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned.as_str(),
    };

    let steps: Vec<String> = serde_json::from_str(sliced).map_err(|e| {
        OrchestrationError::PlanParse(format!("{} | raw={}", e, raw))
    })?;

    if steps.iter().all(|s| s.trim().is_empty()) {
        return Err(OrchestrationError::PlanParse(
            "Parsed plan contains no steps".to_string(),
        ));
    }

    Ok(steps)
}

/// Deterministic two-step plan used when every parse attempt fails.
pub fn fallback_plan(task: &str) -> Vec<String> {
    vec![
        format!("Research {} thoroughly", task),
        format!("Synthesize findings on {}", task),
    ]
}

/// LLM-backed planner with bounded repair retries.
pub struct Planner {
    provider: Arc<dyn Provider>,
    backend: String,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, backend: String) -> Self {
        Self { provider, backend }
    }

    fn build_prompt(task: &str, background: &str) -> String {
        let background = crate::models::excerpt(background, BACKGROUND_CAP);
        PLANNER_PROMPT
            .replace("{background}", &background)
            .replace("{task}", task)
    }

    /// Produce an ordered step list for `task`. Re-invokes the planner
    /// backend on parse failure, up to the attempt ceiling, then falls
    /// back to the deterministic plan.
    pub async fn create_plan(&self, task: &str, background: &str) -> Vec<String> {
        let prompt = Self::build_prompt(task, background);

        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let outcome = match self.provider.call(&prompt, &self.backend).await {
                Ok(response) => parse_steps(&response),
                Err(e) => Err(OrchestrationError::Provider(e)),
            };

            match outcome {
                Ok(steps) => {
                    debug!(step_count = steps.len(), attempt, "Plan parsed");
                    return steps;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Plan attempt failed");
                }
            }
        }

        warn!("All plan attempts exhausted, using fallback plan");
        fallback_plan(task)
    }
}
