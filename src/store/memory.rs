//! In-process store backed by hash maps.

use super::AnalysisStore;
use crate::error::{AnalysisError, EngineResult};
use crate::models::{
    Agent, AgentStatus, AnalysisResult, CodeSubmission, Specialty, SubmissionStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    submissions: HashMap<String, CodeSubmission>,
    agents: Vec<Agent>,
    results: Vec<AnalysisResult>,
}

/// Store that lives as long as the process.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with the default roster.
    pub fn new() -> Self {
        let state = State {
            agents: Specialty::ALL.into_iter().map(Agent::new).collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| AnalysisError::Store(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_submission(&self, submission: &CodeSubmission) -> EngineResult<()> {
        let mut state = self.lock()?;
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> EngineResult<CodeSubmission> {
        let state = self.lock()?;
        state
            .submissions
            .get(id)
            .cloned()
            .ok_or_else(|| AnalysisError::NotFound(format!("submission {}", id)))
    }

    async fn update_submission_status(
        &self,
        id: &str,
        status: SubmissionStatus,
    ) -> EngineResult<()> {
        let mut state = self.lock()?;
        let submission = state
            .submissions
            .get_mut(id)
            .ok_or_else(|| AnalysisError::NotFound(format!("submission {}", id)))?;

        if !submission.status.can_transition_to(status) {
            return Err(AnalysisError::InvalidTransition {
                from: submission.status,
                to: status,
            });
        }

        submission.status = status;
        if status.is_terminal() {
            submission.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        Ok(self.lock()?.agents.clone())
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()> {
        let mut state = self.lock()?;
        let agent = state
            .agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| AnalysisError::NotFound(format!("agent {}", agent_id)))?;
        agent.status = status;
        Ok(())
    }

    async fn save_result(&self, result: &AnalysisResult) -> EngineResult<()> {
        let mut state = self.lock()?;
        let exists = state
            .results
            .iter()
            .any(|r| r.submission_id == result.submission_id && r.agent_id == result.agent_id);

        if exists {
            return Err(AnalysisError::DuplicateResult {
                submission: result.submission_id.clone(),
                agent: result.agent_name.clone(),
            });
        }

        state.results.push(result.clone());
        Ok(())
    }

    async fn results_for(&self, submission_id: &str) -> EngineResult<Vec<AnalysisResult>> {
        let state = self.lock()?;
        Ok(state
            .results
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect())
    }
}
