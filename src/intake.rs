//! Submission intake: validate, record, start orchestration.

use crate::error::{AnalysisError, EngineResult};
use crate::models::{AnalysisReport, CodeSubmission, Specialty, SubmissionId};
use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tracing::{info, warn};

/// Largest accepted submission by default (1 MiB).
pub const DEFAULT_MAX_CODE_BYTES: usize = 1024 * 1024;

/// A request to analyze one piece of code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSubmission {
    pub code: String,
    pub language: String,
    pub filename: Option<String>,
    /// Restrict the run to these specialties. `None` runs the full roster.
    pub agents: Option<Vec<Specialty>>,
}

impl NewSubmission {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_agents(mut self, agents: Vec<Specialty>) -> Self {
        self.agents = Some(agents);
        self
    }
}

/// Normalize a language name or common alias to the name rules are keyed by.
pub fn canonical_language(language: &str) -> String {
    let lower = language.trim().to_lowercase();
    match lower.as_str() {
        "js" | "jsx" | "mjs" | "cjs" | "node" => "javascript".to_string(),
        "ts" | "tsx" => "typescript".to_string(),
        "py" | "python3" => "python".to_string(),
        "htm" => "html".to_string(),
        "sh" | "bash" | "zsh" => "shell".to_string(),
        "rb" => "ruby".to_string(),
        "rs" => "rust".to_string(),
        _ => lower,
    }
}

/// Entry point for new analyses.
pub struct SubmissionIntake {
    orchestrator: Arc<Orchestrator>,
    max_code_bytes: usize,
}

impl SubmissionIntake {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
        }
    }

    pub fn with_max_code_bytes(mut self, max_code_bytes: usize) -> Self {
        self.max_code_bytes = max_code_bytes;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Validate and record a submission, then analyze it in the background.
    ///
    /// Returns as soon as the pending submission is stored. Progress is
    /// published on the orchestrator's bus under the returned id.
    pub async fn start_analysis(&self, request: NewSubmission) -> EngineResult<SubmissionId> {
        let (submission, agents) = self.accept(request).await?;
        let id = submission.id.clone();

        let orchestrator = Arc::clone(&self.orchestrator);
        let run_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run(&run_id, agents.as_deref()).await {
                warn!("Analysis of submission {} failed: {}", run_id, e);
            }
        });

        Ok(id)
    }

    /// Validate, record and analyze a submission, waiting for the outcome.
    ///
    /// A failed run still yields its report, with status `failed` and any
    /// results stored before the failure.
    pub async fn analyze(&self, request: NewSubmission) -> EngineResult<AnalysisReport> {
        let (submission, agents) = self.accept(request).await?;

        if let Err(e) = self.orchestrator.run(&submission.id, agents.as_deref()).await {
            warn!("Analysis of {} failed: {}", submission.display_name(), e);
        }

        self.orchestrator.get_analysis(&submission.id).await
    }

    async fn accept(
        &self,
        request: NewSubmission,
    ) -> EngineResult<(CodeSubmission, Option<Vec<Specialty>>)> {
        let agents = self.validate(&request)?;

        let submission = CodeSubmission::new(
            request.code,
            canonical_language(&request.language),
            request.filename,
        );
        self.orchestrator.store().create_submission(&submission).await?;

        info!(
            "Accepted submission {} ({}, {} bytes)",
            submission.id,
            submission.language,
            submission.code.len()
        );
        Ok((submission, agents))
    }

    fn validate(&self, request: &NewSubmission) -> EngineResult<Option<Vec<Specialty>>> {
        if request.code.trim().is_empty() {
            return Err(AnalysisError::Validation("code is empty".to_string()));
        }
        if request.code.len() > self.max_code_bytes {
            return Err(AnalysisError::Validation(format!(
                "code is {} bytes, limit is {}",
                request.code.len(),
                self.max_code_bytes
            )));
        }
        if request.language.trim().is_empty() {
            return Err(AnalysisError::Validation("language is required".to_string()));
        }

        match &request.agents {
            None => Ok(None),
            Some(agents) if agents.is_empty() => Err(AnalysisError::Validation(
                "agent selection is empty".to_string(),
            )),
            Some(agents) => {
                let mut unique = agents.clone();
                unique.sort();
                unique.dedup();
                Ok(Some(unique))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DisabledCompletion, PipelineDeps};
    use crate::models::{Severity, SubmissionStatus};
    use crate::patterns::BuiltinRuleLibrary;
    use crate::progress::ProgressBus;
    use crate::store::MemoryStore;
    use tokio_test::assert_err;

    fn intake() -> SubmissionIntake {
        let deps = PipelineDeps {
            llm: Arc::new(DisabledCompletion),
            rules: Arc::new(BuiltinRuleLibrary::default()),
            bus: Arc::new(ProgressBus::default()),
        };
        let orchestrator = Orchestrator::new(Arc::new(MemoryStore::new()), deps);
        SubmissionIntake::new(Arc::new(orchestrator))
    }

    #[test]
    fn test_canonical_language() {
        assert_eq!(canonical_language("JS"), "javascript");
        assert_eq!(canonical_language(" tsx "), "typescript");
        assert_eq!(canonical_language("py"), "python");
        assert_eq!(canonical_language("Go"), "go");
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_input() {
        let intake = intake().with_max_code_bytes(16);

        assert_err!(intake.start_analysis(NewSubmission::new("  \n", "javascript")).await);
        assert_err!(intake.start_analysis(NewSubmission::new("x".repeat(17), "javascript")).await);
        assert_err!(intake.start_analysis(NewSubmission::new("let a;", " ")).await);

        let err = intake
            .start_analysis(NewSubmission::new("let a;", "js").with_agents(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_analysis_runs_in_background() {
        let intake = intake();
        let id = intake
            .start_analysis(NewSubmission::new("const result = eval(data.input);", "js"))
            .await
            .unwrap();

        let mut sub = intake.orchestrator().bus().subscribe(&id);
        let report = loop {
            let report = intake.orchestrator().get_analysis(&id).await.unwrap();
            if report.status.is_terminal() {
                break report;
            }
            if sub.recv().await.is_none() {
                break intake.orchestrator().get_analysis(&id).await.unwrap();
            }
        };

        assert_eq!(report.status, SubmissionStatus::Completed);
        assert_eq!(report.submission.language, "javascript");
        assert!(report.findings().any(|f| f.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn test_analyze_waits_for_outcome() {
        let intake = intake();
        let report = intake
            .analyze(
                NewSubmission::new("console.log(\"hi\")", "javascript")
                    .with_filename("hello.js")
                    .with_agents(vec![Specialty::Security, Specialty::Security]),
            )
            .await
            .unwrap();

        assert_eq!(report.status, SubmissionStatus::Completed);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.submission.filename.as_deref(), Some("hello.js"));
        assert!(report.findings().all(|f| f.severity != Severity::Critical));
    }
}
