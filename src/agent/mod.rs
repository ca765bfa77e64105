//! Main orchestrator - the staged research state machine
//!
//! BACKGROUND → PLAN → APPROVAL (suspend) → EXECUTE LOOP → REPORT
//!
//! Backend and tool failures are absorbed as in-band text at every stage;
//! the machine itself only fails on collaborator protocol violations
//! (resuming a run that is not suspended).

use crate::config::BackendConfig;
use crate::ensemble::EnsembleEngine;
use crate::error::{OrchestrationError, Result};
use crate::models::{excerpt, ApprovalSignal, StepRecord, StepStrategy, WorkflowPhase, WorkflowState};
use crate::planner::Planner;
use crate::provider::{render_in_band, Provider};
use crate::tools::ToolRegistry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Excerpt caps carried into prompts, in characters.
const STEP_CONTEXT_EXCERPT: usize = 300;
const GENERIC_SEARCH_EXCERPT: usize = 1000;
const FOCUS_SEARCH_EXCERPT: usize = 600;
const MAX_FOCUS_SEARCHES: usize = 2;

const EXECUTOR_PROMPT: &str = r#"You are a Senior Financial Analyst executing ONE STEP of a deep research plan.

CURRENT STEP: {step}
CONTEXT FROM PREVIOUS STEPS: {context}

OUTPUT INSTRUCTIONS:
If a specific tool is required, output EXACTLY: TOOL: <tool_name> ARGS: <json_args>
If analysis/reasoning is required, output: TOOL: ensemble_query ARGS: {"query": "your analytical question"}
If synthesis is required, just write the synthesis text directly.

Tools available: web_search, company_fundamentals, historical_performance, ensemble_query.
"#;

const ANALYSIS_PROMPT: &str = r#"Analyze this financial query: "{task}"
Extract:
1. Core Entity (company, sector, market)
2. Focus Areas
3. Suggested Generic Search Query

Return ONLY valid JSON: { "core_entity": "...", "focus_areas": [], "generic_search": "..." }
"#;

const REPORTER_PROMPT: &str = r#"You are the Chief Financial Editor.
Compile the research notes into a comprehensive, professional financial report in Markdown.

Original Task: {task}

RESEARCH NOTES:
{notes}

Final Report (Use Headers, Tables, Bullet Points):
"#;

#[derive(Debug, Deserialize)]
struct QueryAnalysis {
    core_entity: Option<String>,
    #[serde(default)]
    focus_areas: Vec<String>,
    generic_search: Option<String>,
}

/// Main orchestrator that drives one research run through its phases.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    planner: Planner,
    ensemble: EnsembleEngine,
    tools: ToolRegistry,
    config: Arc<BackendConfig>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        planner: Planner,
        ensemble: EnsembleEngine,
        tools: ToolRegistry,
        config: Arc<BackendConfig>,
    ) -> Self {
        Self {
            provider,
            planner,
            ensemble,
            tools,
            config,
        }
    }

    /// Run background research and planning for `task`, leaving the run
    /// suspended at the approval boundary. The returned state carries the
    /// editable plan; hand it back through [`resume`](Self::resume).
    pub async fn start(&self, task: &str) -> Result<WorkflowState> {
        let mut state = WorkflowState::new(task);

        info!(run_id = ?state.run_id, task = %state.task, "Starting research run");

        state.phase = WorkflowPhase::BackgroundResearch;
        state.background = self.background_research(task).await;
        state.touch();

        state.phase = WorkflowPhase::Planning;
        let steps = self.planner.create_plan(task, &state.background).await;
        state.install_plan(steps);

        debug!(
            run_id = ?state.run_id,
            step_count = state.plan.len(),
            "Plan installed, awaiting approval"
        );

        state.phase = WorkflowPhase::AwaitingApproval;
        state.touch();
        Ok(state)
    }

    /// Resume a run suspended at the approval boundary.
    ///
    /// Legal signals are approve, approve-with-edits and cancel; delivering
    /// a signal to a run in any other phase is a protocol violation and
    /// fails hard.
    pub async fn resume(
        &self,
        mut state: WorkflowState,
        signal: ApprovalSignal,
    ) -> Result<WorkflowState> {
        if state.phase != WorkflowPhase::AwaitingApproval {
            return Err(OrchestrationError::IllegalTransition(format!(
                "run {} is {}, resume requires awaiting_approval",
                state.run_id, state.phase
            )));
        }

        match signal {
            ApprovalSignal::Cancel => {
                info!(run_id = ?state.run_id, "Run cancelled at approval boundary");
                state.phase = WorkflowPhase::Cancelled;
                state.plan.clear();
                state.background.clear();
                state.cursor = 0;
                state.step_results.clear();
                state.touch();
                return Ok(state);
            }
            ApprovalSignal::ApproveWithEdits { plan } => {
                info!(run_id = ?state.run_id, "Plan replaced by caller edits");
                state.install_plan(plan.lines().map(|l| l.to_string()).collect());
            }
            ApprovalSignal::Approve => {}
        }

        state.phase = WorkflowPhase::Executing;
        self.execute_plan(&mut state).await;

        state.phase = WorkflowPhase::Reporting;
        let report = self.write_report(&state).await;
        state.final_report = Some(report);

        state.phase = WorkflowPhase::Done;
        state.touch();

        info!(run_id = ?state.run_id, steps = state.step_results.len(), "Run complete");
        Ok(state)
    }

    // =============================
    // Background Research
    // =============================

    async fn background_research(&self, task: &str) -> String {
        let mut blocks = Vec::new();

        match self.focus_and_search(task).await {
            Ok(researched) => blocks.extend(researched),
            Err(e) => {
                warn!(error = %e, "Query analysis failed, using fallback search");
                let basic = self
                    .search(task)
                    .await
                    .unwrap_or_else(|e| format!("Error: {}", e));
                blocks.push(format!(
                    "## BASIC SEARCH\n\n{}",
                    excerpt(&basic, GENERIC_SEARCH_EXCERPT)
                ));
            }
        }

        if blocks.is_empty() {
            "No background info.".to_string()
        } else {
            blocks.join("\n\n")
        }
    }

    /// Best-effort focus extraction plus the searches it suggests. Any
    /// failure before the first search block lands falls back to a plain
    /// search on the raw task.
    async fn focus_and_search(&self, task: &str) -> Result<Vec<String>> {
        let analysis = self.extract_focus(task).await?;

        let core_entity = analysis
            .core_entity
            .clone()
            .unwrap_or_else(|| task.to_string());
        let generic_search = analysis
            .generic_search
            .clone()
            .unwrap_or_else(|| task.to_string());

        debug!(core_entity = %core_entity, "Query analysis complete");

        let generic_result = self.search(&generic_search).await?;
        let mut blocks = vec![format!(
            "## CORE ENTITY RESEARCH: {}\n\n{}",
            core_entity,
            excerpt(&generic_result, GENERIC_SEARCH_EXCERPT)
        )];

        for area in analysis.focus_areas.iter().take(MAX_FOCUS_SEARCHES) {
            let query = format!("{} latest news financial analysis", area);
            match self.search(&query).await {
                Ok(news) => blocks.push(format!(
                    "## {} NEWS\n{}",
                    area,
                    excerpt(&news, FOCUS_SEARCH_EXCERPT)
                )),
                Err(e) => warn!(area = %area, error = %e, "Targeted search failed"),
            }
        }

        Ok(blocks)
    }

    async fn extract_focus(&self, task: &str) -> Result<QueryAnalysis> {
        let prompt = ANALYSIS_PROMPT.replace("{task}", task);
        let response = self.provider.call(&prompt, &self.config.planner).await?;

        let cleaned = response
            .replace("```json", "")
            .replace("```", "")
            .trim()
            .to_string();

        serde_json::from_str(&cleaned).map_err(|e| {
            OrchestrationError::PlanParse(format!("Query analysis parse error: {}", e))
        })
    }

    async fn search(&self, query: &str) -> Result<String> {
        let tool = self
            .tools
            .get("web_search")
            .ok_or_else(|| OrchestrationError::ToolNotFound("web_search".to_string()))?;
        tool.invoke(&json!({ "query": query })).await
    }

    // =============================
    // Execution Loop
    // =============================

    async fn execute_plan(&self, state: &mut WorkflowState) {
        while state.cursor < state.plan.len() {
            let step = state.plan[state.cursor].clone();

            info!(
                step = state.cursor + 1,
                total = state.plan.len(),
                description = %step.description,
                "Executing step"
            );

            let context = context_digest(&state.step_results);

            let output = match step.strategy {
                StepStrategy::Ensemble => self.ensemble.query(&step.description, &context).await,
                StepStrategy::Direct => self.execute_direct(&step.description, &context).await,
            };

            state.step_results.push(StepRecord {
                index: step.index,
                description: step.description,
                output,
            });
            state.cursor += 1;
            state.touch();
        }
    }

    /// One executor-backend call: either a tool directive to dispatch or
    /// direct prose synthesis. Every failure path lands in-band.
    async fn execute_direct(&self, step: &str, context: &str) -> String {
        let prompt = EXECUTOR_PROMPT
            .replace("{step}", step)
            .replace("{context}", context);

        let response = render_in_band(self.provider.call(&prompt, &self.config.executor).await);

        if response.contains("TOOL:") {
            self.dispatch_tool_directive(&response, step, context).await
        } else {
            response
        }
    }

    async fn dispatch_tool_directive(&self, response: &str, step: &str, context: &str) -> String {
        let directive = match response.split_once("TOOL:") {
            Some((_, rest)) => rest,
            None => return response.to_string(),
        };

        let Some((name_part, args_part)) = directive.split_once("ARGS:") else {
            return format!(
                "Tool Execution Failed: directive missing ARGS in '{}'",
                excerpt(directive.trim(), 120)
            );
        };

        let tool_name = name_part.trim();
        let args: Value = match serde_json::from_str(args_part.trim()) {
            Ok(v) => v,
            Err(e) => return format!("Tool Execution Failed: {}", e),
        };

        debug!(tool = %tool_name, "Dispatching tool directive");

        // Analytical directives route back through the ensemble.
        if tool_name == "ensemble_query" {
            let query = args.get("query").and_then(Value::as_str).unwrap_or(step);
            let answer = self.ensemble.query(query, context).await;
            return format!("Tool Output:\n{}", answer);
        }

        match self.tools.get(tool_name) {
            Some(tool) => match tool.invoke(&args).await {
                Ok(output) => format!("Tool Output:\n{}", output),
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "Tool execution failed");
                    format!("Tool Execution Failed: {}", e)
                }
            },
            None => {
                warn!(tool = %tool_name, "Unknown tool requested");
                format!("Unknown tool: {}", tool_name)
            }
        }
    }

    // =============================
    // Reporting
    // =============================

    async fn write_report(&self, state: &WorkflowState) -> String {
        let notes: Vec<String> = state
            .step_results
            .iter()
            .map(|r| {
                format!(
                    "## Finding from step {} '{}'\n{}",
                    r.index + 1,
                    r.description,
                    r.output
                )
            })
            .collect();

        let prompt = REPORTER_PROMPT
            .replace("{task}", &state.task)
            .replace("{notes}", &notes.join("\n"));

        info!(writer = %self.config.writer, "Synthesizing final report");

        render_in_band(self.provider.call(&prompt, &self.config.writer).await)
    }
}

/// Digest of prior step results for the executor prompt, each output
/// truncated to a fixed excerpt, in insertion order.
fn context_digest(records: &[StepRecord]) -> String {
    records
        .iter()
        .map(|r| {
            format!(
                "Step {} '{}': {}",
                r.index + 1,
                r.description,
                excerpt(&r.output, STEP_CONTEXT_EXCERPT)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{ProviderResult, ScriptedProvider};
    use crate::tools::StaticTool;

    fn build_orchestrator(
        responses: Vec<ProviderResult>,
    ) -> (Orchestrator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let config = Arc::new(BackendConfig::from_env());

        let planner = Planner::new(provider.clone(), config.planner.clone());
        let ensemble = EnsembleEngine::new(
            provider.clone(),
            config.ensemble_workers.clone(),
            config.judge.clone(),
        );

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool {
            tool_name: "web_search",
            response: "search results about TCS",
        }));

        let orchestrator = Orchestrator::new(
            provider.clone(),
            planner,
            ensemble,
            tools,
            config,
        );
        (orchestrator, provider)
    }

    const ANALYSIS_JSON: &str =
        r#"{"core_entity": "TCS", "focus_areas": ["IT services"], "generic_search": "TCS financial performance"}"#;

    #[tokio::test]
    async fn test_full_run_records_every_step_and_reports_once() {
        let (orchestrator, provider) = build_orchestrator(vec![
            // background: query analysis
            Ok(ANALYSIS_JSON.to_string()),
            // planning
            Ok(r#"["Research fundamentals", "Compare to peers", "Synthesize report"]"#.to_string()),
            // executing: one executor call per step
            Ok("TOOL: web_search ARGS: {\"query\": \"TCS fundamentals\"}".to_string()),
            Ok("Peers lag TCS on margin.".to_string()),
            Ok("Overall TCS leads the sector.".to_string()),
            // reporting
            Ok("# Final Report\nAll good.".to_string()),
        ]);

        let state = orchestrator
            .start("Analyze TCS financial performance")
            .await
            .unwrap();
        assert_eq!(state.phase, WorkflowPhase::AwaitingApproval);
        assert_eq!(state.plan.len(), 3);
        assert!(state.background.contains("CORE ENTITY RESEARCH: TCS"));

        let done = orchestrator
            .resume(state, ApprovalSignal::Approve)
            .await
            .unwrap();

        assert_eq!(done.phase, WorkflowPhase::Done);
        assert_eq!(done.cursor, 3);
        assert_eq!(done.step_results.len(), 3);
        assert!(done.step_results[0].output.contains("search results about TCS"));
        assert_eq!(done.final_report.as_deref(), Some("# Final Report\nAll good."));

        // Writer saw all three findings in one prompt.
        let calls = provider.calls();
        let writer_prompt = &calls.last().unwrap().1;
        assert!(writer_prompt.contains("Research fundamentals"));
        assert!(writer_prompt.contains("Compare to peers"));
        assert!(writer_prompt.contains("Synthesize report"));
        assert!(writer_prompt.contains("Peers lag TCS on margin."));
    }

    #[tokio::test]
    async fn test_cancel_clears_plan_but_preserves_task() {
        let (orchestrator, _provider) = build_orchestrator(vec![
            // background analysis fails, degrade to raw-task search
            Err(ProviderError::Network("connection reset".to_string())),
            // planning succeeds
            Ok(r#"["Research fundamentals"]"#.to_string()),
        ]);

        let state = orchestrator.start("Analyze TCS").await.unwrap();
        assert_eq!(state.phase, WorkflowPhase::AwaitingApproval);
        assert!(state.background.contains("BASIC SEARCH"));

        let cancelled = orchestrator
            .resume(state, ApprovalSignal::Cancel)
            .await
            .unwrap();

        assert_eq!(cancelled.phase, WorkflowPhase::Cancelled);
        assert!(cancelled.plan.is_empty());
        assert!(cancelled.background.is_empty());
        assert_eq!(cancelled.task, "Analyze TCS");
        assert!(cancelled.final_report.is_none());
    }

    #[tokio::test]
    async fn test_resume_outside_approval_fails_hard() {
        let (orchestrator, _provider) = build_orchestrator(vec![]);

        let mut state = WorkflowState::new("task");
        state.phase = WorkflowPhase::Done;

        let err = orchestrator
            .resume(state, ApprovalSignal::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_edited_plan_replaces_original_and_retags() {
        let (orchestrator, provider) = build_orchestrator(vec![
            Ok(ANALYSIS_JSON.to_string()),
            Ok(r#"["Original step"]"#.to_string()),
            // step 1 (ensemble): three workers + judge
            Ok("worker one".to_string()),
            Ok("worker two".to_string()),
            Ok("worker three".to_string()),
            Ok("judged comparison".to_string()),
            // step 2 (direct prose)
            Ok("closing synthesis".to_string()),
            // report
            Ok("report text".to_string()),
        ]);

        let state = orchestrator.start("Compare IT majors").await.unwrap();

        let edited = "Compare peers via ensemble_query\n\nSynthesize findings";
        let done = orchestrator
            .resume(
                state,
                ApprovalSignal::ApproveWithEdits {
                    plan: edited.to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(done.phase, WorkflowPhase::Done);
        assert_eq!(done.plan.len(), 2);
        assert_eq!(done.plan[0].strategy, StepStrategy::Ensemble);
        assert_eq!(done.plan[1].strategy, StepStrategy::Direct);
        assert_eq!(done.step_results[0].output, "judged comparison");
        assert_eq!(done.step_results[1].output, "closing synthesis");

        // 2 start calls + 4 ensemble calls + 1 direct step + 1 writer
        assert_eq!(provider.calls().len(), 8);
    }

    #[tokio::test]
    async fn test_step_failures_are_recorded_in_band_and_cursor_advances() {
        let (orchestrator, _provider) = build_orchestrator(vec![
            Ok(ANALYSIS_JSON.to_string()),
            Ok(r#"["Use a bad tool", "Use bad args", "Fail outright"]"#.to_string()),
            Ok("TOOL: quantum_oracle ARGS: {}".to_string()),
            Ok("TOOL: web_search ARGS: {not json".to_string()),
            Err(ProviderError::Http {
                status: 503,
                body: "executor down".to_string(),
            }),
            Ok("report".to_string()),
        ]);

        let state = orchestrator.start("task").await.unwrap();
        let done = orchestrator
            .resume(state, ApprovalSignal::Approve)
            .await
            .unwrap();

        assert_eq!(done.phase, WorkflowPhase::Done);
        assert_eq!(done.cursor, 3);
        assert_eq!(done.step_results.len(), 3);
        assert_eq!(done.step_results[0].output, "Unknown tool: quantum_oracle");
        assert!(done.step_results[1].output.starts_with("Tool Execution Failed:"));
        assert_eq!(done.step_results[2].output, "Error: 503: executor down");
    }

    #[test]
    fn test_context_digest_truncates_and_orders() {
        let records = vec![
            StepRecord {
                index: 0,
                description: "first".to_string(),
                output: "x".repeat(500),
            },
            StepRecord {
                index: 1,
                description: "second".to_string(),
                output: "short".to_string(),
            },
        ];

        let digest = context_digest(&records);
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Step 1 'first'"));
        assert!(lines[0].len() < 500);
        assert!(lines[1].contains("short"));
    }
}
