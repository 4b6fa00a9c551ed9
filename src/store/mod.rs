//! Durable storage for submissions, the agent roster and per-agent results.
//!
//! The orchestrator only talks to [`AnalysisStore`]; `MemoryStore` keeps
//! everything in process and `SqliteStore` persists to a SQLite file.

pub mod memory;
pub mod sqlite;

use crate::error::EngineResult;
use crate::models::{Agent, AgentStatus, AnalysisResult, CodeSubmission, SubmissionStatus};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage collaborator used by intake and orchestration.
///
/// Implementations seed one agent per specialty on creation.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Record a new submission.
    async fn create_submission(&self, submission: &CodeSubmission) -> EngineResult<()>;

    /// Fetch a submission, `NotFound` if unknown.
    async fn get_submission(&self, id: &str) -> EngineResult<CodeSubmission>;

    /// Move a submission along its lifecycle.
    ///
    /// Rejects anything but pending -> analyzing -> {completed, failed}.
    async fn update_submission_status(&self, id: &str, status: SubmissionStatus)
        -> EngineResult<()>;

    /// The agent roster, in specialty order.
    async fn list_agents(&self) -> EngineResult<Vec<Agent>>;

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()>;

    /// Store the result of one pipeline. Each (submission, agent) pair is written once.
    async fn save_result(&self, result: &AnalysisResult) -> EngineResult<()>;

    /// Every stored result for a submission, in write order.
    async fn results_for(&self, submission_id: &str) -> EngineResult<Vec<AnalysisResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::models::{Finding, Severity, Specialty};
    use chrono::Utc;

    fn result_for(submission: &CodeSubmission, agent: &Agent, findings: Vec<Finding>) -> AnalysisResult {
        AnalysisResult {
            submission_id: submission.id.clone(),
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            specialty: agent.specialty,
            fork_id: uuid::Uuid::new_v4().to_string(),
            findings,
            confidence: 0.9,
            execution_time_ms: 12,
            pattern_matches: 1,
            created_at: Utc::now(),
        }
    }

    /// Behaviour every store must share.
    async fn check_store_contract(store: &dyn AnalysisStore) {
        let agents = store.list_agents().await.unwrap();
        let specialties: Vec<_> = agents.iter().map(|a| a.specialty).collect();
        assert_eq!(specialties, Specialty::ALL.to_vec());
        assert!(agents.iter().all(|a| a.status == AgentStatus::Idle));

        let submission = CodeSubmission::new(
            "eval(x)".to_string(),
            "javascript".to_string(),
            Some("app.js".to_string()),
        );
        store.create_submission(&submission).await.unwrap();

        let loaded = store.get_submission(&submission.id).await.unwrap();
        assert_eq!(loaded.code, "eval(x)");
        assert_eq!(loaded.filename.as_deref(), Some("app.js"));
        assert_eq!(loaded.status, SubmissionStatus::Pending);

        // Lifecycle is monotonic.
        let err = store
            .update_submission_status(&submission.id, SubmissionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTransition { .. }));

        store
            .update_submission_status(&submission.id, SubmissionStatus::Analyzing)
            .await
            .unwrap();
        store
            .update_submission_status(&submission.id, SubmissionStatus::Completed)
            .await
            .unwrap();
        let done = store.get_submission(&submission.id).await.unwrap();
        assert_eq!(done.status, SubmissionStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(store
            .update_submission_status(&submission.id, SubmissionStatus::Failed)
            .await
            .is_err());

        // Agent status.
        store
            .set_agent_status(&agents[1].id, AgentStatus::Error)
            .await
            .unwrap();
        let agents_after = store.list_agents().await.unwrap();
        assert_eq!(agents_after[1].status, AgentStatus::Error);
        assert!(matches!(
            store.set_agent_status("missing", AgentStatus::Idle).await,
            Err(AnalysisError::NotFound(_))
        ));

        // Results are written once and read back in order.
        let first = result_for(
            &submission,
            &agents[0],
            vec![Finding::new(Severity::Critical, "security", "eval").at_line(1)],
        );
        let second = result_for(&submission, &agents[2], Vec::new());
        store.save_result(&first).await.unwrap();
        store.save_result(&second).await.unwrap();

        let dup = store.save_result(&first).await.unwrap_err();
        assert!(matches!(dup, AnalysisError::DuplicateResult { .. }));

        let results = store.results_for(&submission.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_id, agents[0].id);
        assert_eq!(results[0].findings, first.findings);
        assert_eq!(results[0].fork_id, first.fork_id);
        assert_eq!(results[1].agent_id, agents[2].id);

        assert!(store.results_for("other").await.unwrap().is_empty());
        assert!(matches!(
            store.get_submission("other").await,
            Err(AnalysisError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        check_store_contract(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        check_store_contract(&SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.db");

        let submission = CodeSubmission::new("x == y".to_string(), "javascript".to_string(), None);
        let agents = {
            let store = SqliteStore::open_at(&path).unwrap();
            store.create_submission(&submission).await.unwrap();
            store.list_agents().await.unwrap()
        };

        let reopened = SqliteStore::open_at(&path).unwrap();
        assert_eq!(reopened.list_agents().await.unwrap(), agents);
        assert_eq!(
            reopened.get_submission(&submission.id).await.unwrap().code,
            "x == y"
        );
    }
}
