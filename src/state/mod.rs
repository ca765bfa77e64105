//! Run state storage
//!
//! Holds suspended workflow runs across the approval boundary. In-memory
//! only; a run lives exactly as long as the process that started it.

use crate::error::{OrchestrationError, Result};
use crate::models::WorkflowState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for run state storage
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, state: WorkflowState) -> Result<()>;
    async fn load(&self, run_id: Uuid) -> Result<WorkflowState>;
    async fn list(&self) -> Result<Vec<Uuid>>;
}

/// In-memory run store
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, WorkflowState>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, state: WorkflowState) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(state.run_id, state);
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<WorkflowState> {
        let runs = self.runs.read().await;
        runs.get(&run_id)
            .cloned()
            .ok_or(OrchestrationError::RunNotFound(run_id))
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let runs = self.runs.read().await;
        let mut ids: Vec<_> = runs
            .values()
            .map(|state| (state.run_id, state.created_at))
            .collect();
        ids.sort_by_key(|(_, created_at)| *created_at);
        Ok(ids.into_iter().map(|(id, _)| id).collect())
    }
}
