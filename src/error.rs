//! Error types for the analysis engine.

use crate::models::SubmissionStatus;
use thiserror::Error;

/// Result alias used across the engine.
pub type EngineResult<T> = std::result::Result<T, AnalysisError>;

/// Errors that can escape the intake, a pipeline or the orchestrator.
///
/// Rule compile faults never appear here: they degrade to literal matching.
/// LLM faults never appear here either: the pipeline swallows them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Bad caller input, rejected before orchestration starts
    #[error("Invalid submission: {0}")]
    Validation(String),

    /// The durable store failed or is unreachable
    #[error("Store operation failed: {0}")]
    Store(String),

    /// A status change that would break pending -> analyzing -> {completed, failed}
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    /// Unknown submission or agent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A result already exists for this (submission, agent) pair
    #[error("Result already stored for submission {submission} and agent {agent}")]
    DuplicateResult { submission: String, agent: String },

    /// The rule library could not be read
    #[error("Rule library unavailable: {0}")]
    RuleLibrary(String),

    /// Any other pipeline failure
    #[error("Agent {agent} failed: {message}")]
    AgentExecution { agent: String, message: String },
}

impl AnalysisError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        AnalysisError::Store(err.to_string())
    }

    /// Wrap an error as a pipeline failure of `agent`, keeping structured kinds intact.
    pub fn for_agent(self, agent: &str) -> Self {
        match self {
            AnalysisError::AgentExecution { .. } => self,
            other => AnalysisError::AgentExecution {
                agent: agent.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(err: rusqlite::Error) -> Self {
        AnalysisError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::Store(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_agent_wraps_once() {
        let err = AnalysisError::Store("disk full".to_string()).for_agent("Security Agent");
        assert_eq!(
            err.to_string(),
            "Agent Security Agent failed: Store operation failed: disk full"
        );

        let again = err.clone().for_agent("Other");
        assert_eq!(again, err);
    }

    #[test]
    fn test_transition_message() {
        let err = AnalysisError::InvalidTransition {
            from: SubmissionStatus::Completed,
            to: SubmissionStatus::Analyzing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> analyzing"
        );
    }
}
