//! Multi-model ensemble with meta-judge synthesis
//!
//! Fans one prompt out to the configured worker backends and asks a judge
//! backend to select or synthesize the best answer. Worker failures are
//! recorded in-band and never short-circuit the fan-out; the judge's raw
//! return value is the ensemble's answer.

use crate::provider::{render_in_band, Provider};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct WorkerResponse {
    model: String,
    response: String,
}

pub struct EnsembleEngine {
    provider: Arc<dyn Provider>,
    workers: Vec<String>,
    judge: String,
}

impl EnsembleEngine {
    pub fn new(provider: Arc<dyn Provider>, workers: Vec<String>, judge: String) -> Self {
        Self {
            provider,
            workers,
            judge,
        }
    }

    /// Run `task` through every worker, then judge the response set.
    pub async fn query(&self, task: &str, context: &str) -> String {
        info!(workers = self.workers.len(), "Ensemble fan-out starting");

        let prompt = format!(
            "Context: {}\n\nTask: {}\n\nProvide a clear, accurate answer.",
            context, task
        );

        let mut responses = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            debug!(worker = %worker, position = i + 1, "Querying ensemble worker");
            let response = render_in_band(self.provider.call(&prompt, worker).await);
            responses.push(WorkerResponse {
                model: worker.clone(),
                response,
            });
        }

        let response_set = serde_json::to_string_pretty(&responses)
            .unwrap_or_else(|_| "[]".to_string());

        let meta_prompt = format!(
            r#"You are a Meta-Judge AI evaluating multiple model responses to select or synthesize the best answer.

Original Query: {}

Model Responses:
{}

INSTRUCTIONS:
1. Compare the responses for accuracy, completeness, and relevance.
2. If one response is clearly superior, select it.
3. If multiple responses have complementary strengths, synthesize them into a unified answer.
4. Return ONLY the final answer (not meta-commentary about the models).

Final Answer:"#,
            task, response_set
        );

        debug!(judge = %self.judge, "Invoking meta-judge");
        let answer = render_in_band(self.provider.call(&meta_prompt, &self.judge).await);

        info!("Ensemble complete");
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::ScriptedProvider;

    fn engine_with(provider: Arc<ScriptedProvider>) -> EnsembleEngine {
        EnsembleEngine::new(
            provider,
            vec![
                "worker-a".to_string(),
                "worker-b".to_string(),
                "worker-c".to_string(),
            ],
            "judge".to_string(),
        )
    }

    #[tokio::test]
    async fn test_worker_failure_does_not_shrink_response_set() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("answer from a".to_string()),
            Err(ProviderError::RateLimited("quota".to_string())),
            Ok("answer from c".to_string()),
            Ok("judged answer".to_string()),
        ]));
        let engine = engine_with(provider.clone());

        let answer = engine.query("compare margins", "some context").await;

        assert_eq!(answer, "judged answer");

        let calls = provider.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].0, "worker-a");
        assert_eq!(calls[1].0, "worker-b");
        assert_eq!(calls[2].0, "worker-c");
        assert_eq!(calls[3].0, "judge");

        // The judge sees all three entries, including the in-band error.
        let judge_prompt = &calls[3].1;
        assert!(judge_prompt.contains("answer from a"));
        assert!(judge_prompt.contains("Error: rate limited: quota"));
        assert!(judge_prompt.contains("answer from c"));
    }

    #[tokio::test]
    async fn test_judge_error_is_returned_in_band() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
            Ok("c".to_string()),
            Err(ProviderError::Http {
                status: 500,
                body: "judge down".to_string(),
            }),
        ]));
        let engine = engine_with(provider);

        let answer = engine.query("task", "").await;
        assert_eq!(answer, "Error: 500: judge down");
    }
}
