//! Error types for the deep research orchestrator

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Failures at the model-backend boundary.
///
/// Call sites either retry or render the error into the same text slot a
/// success would have occupied, so a flaky provider never aborts a run.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("missing credentials: {0}")]
    AuthMissing(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{status}: {body}")]
    Http { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // Illegal transitions are collaborator protocol violations and surface
    // as hard failures, unlike everything above.
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
