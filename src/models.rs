//! Core data models for the research workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Workflow Phase =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Init,
    BackgroundResearch,
    Planning,
    AwaitingApproval,
    Executing,
    Reporting,
    Done,
    Cancelled,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowPhase::Init => "init",
            WorkflowPhase::BackgroundResearch => "background_research",
            WorkflowPhase::Planning => "planning",
            WorkflowPhase::AwaitingApproval => "awaiting_approval",
            WorkflowPhase::Executing => "executing",
            WorkflowPhase::Reporting => "reporting",
            WorkflowPhase::Done => "done",
            WorkflowPhase::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Plan =================
//

/// Execution strategy for one plan step, decided at planning time.
///
/// `Ensemble` steps fan out to the multi-model ensemble; `Direct` steps go
/// through the executor backend and its tool-directive protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStrategy {
    Direct,
    Ensemble,
}

const ANALYTIC_KEYWORDS: &[&str] = &["compare", "analyze", "evaluate", "synthesize"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub strategy: StepStrategy,
}

impl PlanStep {
    /// Tag a step with its execution strategy. A step is ensemble-eligible
    /// when it pairs an analytic keyword with an explicit ensemble marker.
    pub fn tagged(index: usize, description: String) -> Self {
        let lowered = description.to_lowercase();
        let analytic = ANALYTIC_KEYWORDS.iter().any(|k| lowered.contains(k));
        let strategy = if analytic && lowered.contains("ensemble") {
            StepStrategy::Ensemble
        } else {
            StepStrategy::Direct
        };
        Self {
            index,
            description,
            strategy,
        }
    }
}

//
// ================= Step Results =================
//

/// One completed step. Keyed by step index so two steps with identical
/// wording cannot overwrite each other's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub description: String,
    pub output: String,
}

//
// ================= Approval =================
//

/// The three signals a caller may deliver while a run is suspended at the
/// approval boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ApprovalSignal {
    Approve,
    /// Replacement plan as newline-delimited step text; empty lines are
    /// discarded on install.
    #[serde(rename = "edit")]
    ApproveWithEdits { plan: String },
    Cancel,
}

//
// ================= Workflow State =================
//

/// The full state of one research run. This record is what crosses the
/// approval boundary: `start` returns it suspended at `AwaitingApproval`
/// and `resume` consumes it together with an [`ApprovalSignal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    /// Immutable research query driving the run.
    pub task: String,
    pub phase: WorkflowPhase,
    pub background: String,
    pub plan: Vec<PlanStep>,
    /// Index of the next step to execute; 0 <= cursor <= plan.len().
    pub cursor: usize,
    pub step_results: Vec<StepRecord>,
    pub final_report: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(task: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            task: task.into(),
            phase: WorkflowPhase::Init,
            background: String::new(),
            plan: Vec::new(),
            cursor: 0,
            step_results: Vec::new(),
            final_report: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Install a freshly planned (or edited) step list, resetting the
    /// execution cursor and clearing prior results.
    pub fn install_plan(&mut self, steps: Vec<String>) {
        self.plan = steps
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, s)| PlanStep::tagged(i, s.trim().to_string()))
            .collect();
        self.cursor = 0;
        self.step_results.clear();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Truncate text to at most `max` characters, marking the cut. Counts
/// chars, not bytes, so multi-byte content never splits mid-character.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_counts_chars() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        // 4 multi-byte chars survive a 4-char cap untouched
        assert_eq!(excerpt("₹₹₹₹", 4), "₹₹₹₹");
    }

    #[test]
    fn test_step_tagging() {
        let ensemble = PlanStep::tagged(0, "Compare peers via ensemble_query".to_string());
        assert_eq!(ensemble.strategy, StepStrategy::Ensemble);

        // Analytic keyword alone is not enough
        let direct = PlanStep::tagged(1, "Compare revenue to peers".to_string());
        assert_eq!(direct.strategy, StepStrategy::Direct);

        // Ensemble marker without an analytic keyword stays direct
        let direct = PlanStep::tagged(2, "Run ensemble_query on fundamentals".to_string());
        assert_eq!(direct.strategy, StepStrategy::Direct);
    }

    #[test]
    fn test_install_plan_discards_empty_lines() {
        let mut state = WorkflowState::new("task");
        state.install_plan(vec![
            "Research fundamentals".to_string(),
            "   ".to_string(),
            "Synthesize report".to_string(),
        ]);
        assert_eq!(state.plan.len(), 2);
        assert_eq!(state.plan[1].index, 1);
        assert_eq!(state.cursor, 0);
        assert!(state.step_results.is_empty());
    }

    #[test]
    fn test_approval_signal_wire_format() {
        let approve: ApprovalSignal = serde_json::from_str(r#"{"action":"approve"}"#).unwrap();
        assert!(matches!(approve, ApprovalSignal::Approve));

        let edit: ApprovalSignal =
            serde_json::from_str(r#"{"action":"edit","plan":"a\nb"}"#).unwrap();
        assert!(matches!(edit, ApprovalSignal::ApproveWithEdits { .. }));
    }
}
