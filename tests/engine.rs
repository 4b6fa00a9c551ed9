//! End-to-end tests: intake, orchestration, stores and the progress bus.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use yoagents::agent::{DisabledCompletion, PipelineDeps};
use yoagents::error::{AnalysisError, EngineResult};
use yoagents::intake::{NewSubmission, SubmissionIntake};
use yoagents::models::{
    Agent, AgentStatus, AnalysisResult, CodePattern, CodeSubmission, Severity, Specialty,
    SubmissionStatus,
};
use yoagents::orchestrator::Orchestrator;
use yoagents::patterns::{BuiltinRuleLibrary, RuleLibrary};
use yoagents::progress::{ProgressBus, ProgressMessage};
use yoagents::store::{AnalysisStore, MemoryStore, SqliteStore};

fn deps_with(rules: Arc<dyn RuleLibrary>) -> PipelineDeps {
    PipelineDeps {
        llm: Arc::new(DisabledCompletion),
        rules,
        bus: Arc::new(ProgressBus::default()),
    }
}

fn intake_with(store: Arc<dyn AnalysisStore>) -> SubmissionIntake {
    let deps = deps_with(Arc::new(BuiltinRuleLibrary::default()));
    SubmissionIntake::new(Arc::new(Orchestrator::new(store, deps)))
}

fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(path).unwrap()
}

async fn drain(subscription: &mut yoagents::progress::Subscription) -> Vec<ProgressMessage> {
    let mut messages = Vec::new();
    while let Some(message) = subscription.recv().await {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn console_log_has_no_critical_security_finding() {
    let intake = intake_with(Arc::new(MemoryStore::new()));
    let report = intake
        .analyze(NewSubmission::new("console.log(\"hi\")", "javascript"))
        .await
        .unwrap();

    assert_eq!(report.status, SubmissionStatus::Completed);
    assert_eq!(report.results.len(), 4);
    let security = report
        .results
        .iter()
        .find(|r| r.specialty == Specialty::Security)
        .unwrap();
    assert!(security
        .findings
        .iter()
        .all(|f| f.severity != Severity::Critical));
}

#[tokio::test]
async fn eval_yields_critical_security_finding() {
    let intake = intake_with(Arc::new(MemoryStore::new()));
    let report = intake
        .analyze(NewSubmission::new("const result = eval(data.input);", "javascript"))
        .await
        .unwrap();

    assert_eq!(report.status, SubmissionStatus::Completed);
    let security = report
        .results
        .iter()
        .find(|r| r.specialty == Specialty::Security)
        .unwrap();
    let eval = security
        .findings
        .iter()
        .find(|f| f.severity == Severity::Critical)
        .expect("critical finding");
    assert_eq!(eval.line_start, Some(1));
    assert_eq!(eval.rule_id.as_deref(), Some("sec-any-eval"));
    assert!(security.pattern_matches >= 1);
    assert_eq!(security.confidence, 1.0);
}

#[tokio::test]
async fn fixture_findings_add_up_across_agents() {
    let intake = intake_with(Arc::new(MemoryStore::new()));
    let report = intake
        .analyze(NewSubmission::new(fixture("vulnerable.js"), "javascript").with_filename("vulnerable.js"))
        .await
        .unwrap();

    let per_agent: usize = report.results.iter().map(|r| r.findings.len()).sum();
    assert_eq!(report.summary.total, per_agent);
    let by_agent: usize = report.summary.by_agent.values().sum();
    assert_eq!(by_agent, per_agent);

    let rules: Vec<_> = report.findings().filter_map(|f| f.rule_id.as_deref()).collect();
    assert!(rules.contains(&"sec-any-eval"));
    assert!(rules.contains(&"sec-any-secret"));
    assert!(rules.contains(&"sec-js-innerhtml"));
    assert!(report
        .findings()
        .any(|f| f.category == "best-practices" && f.message.contains("==")));

    for result in &report.results {
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(result.submission_id, report.submission.id);
    }
}

#[tokio::test]
async fn html_fixture_reports_accessibility_gaps() {
    let intake = intake_with(Arc::new(MemoryStore::new()));
    let report = intake
        .analyze(
            NewSubmission::new(fixture("page.html"), "html")
                .with_agents(vec![Specialty::Accessibility]),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let findings = &report.results[0].findings;
    assert!(findings
        .iter()
        .any(|f| f.severity == Severity::High && f.line_start == Some(4)));
    assert!(findings.len() >= 4);
}

#[tokio::test]
async fn malformed_rule_falls_back_to_literal_match() {
    let rule = CodePattern {
        id: "custom-eval-call".to_string(),
        pattern: "eval(".to_string(),
        category: Specialty::Security,
        severity: Severity::High,
        language: "*".to_string(),
        description: "eval call".to_string(),
        suggestion: None,
        created_at: chrono::Utc::now(),
    };
    let deps = deps_with(Arc::new(BuiltinRuleLibrary::with_rules(vec![rule])));
    let intake = SubmissionIntake::new(Arc::new(Orchestrator::new(
        Arc::new(MemoryStore::new()),
        deps,
    )));

    let report = intake
        .analyze(
            NewSubmission::new("let a = 1;\nx = eval(y)", "ruby").with_agents(vec![Specialty::Security]),
        )
        .await
        .unwrap();

    assert_eq!(report.status, SubmissionStatus::Completed);
    let finding = report
        .findings()
        .find(|f| f.rule_id.as_deref() == Some("custom-eval-call"))
        .expect("literal match");
    assert_eq!(finding.line_start, Some(2));
    assert_eq!(finding.column_start, Some(4));
    assert_eq!(finding.column_end, Some(9));
}

/// Rule library that is down for one specialty.
struct PartialOutage(Specialty);

#[async_trait]
impl RuleLibrary for PartialOutage {
    async fn fetch_rules(
        &self,
        _language: &str,
        specialty: Specialty,
        _limit: usize,
    ) -> EngineResult<Vec<CodePattern>> {
        if specialty == self.0 {
            Err(AnalysisError::RuleLibrary("connection refused".to_string()))
        } else {
            Ok(Vec::new())
        }
    }
}

#[tokio::test]
async fn failed_agent_fails_submission_and_keeps_results() {
    let store: Arc<dyn AnalysisStore> = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        deps_with(Arc::new(PartialOutage(Specialty::Accessibility))),
    );

    let submission = CodeSubmission::new("var a = 1;".to_string(), "javascript".to_string(), None);
    store.create_submission(&submission).await.unwrap();
    let mut subscription = orchestrator.bus().subscribe(&submission.id);

    let err = orchestrator.run(&submission.id, None).await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));

    let messages = drain(&mut subscription).await;
    assert_eq!(messages.first().map(|m| m.kind()), Some("analysis_started"));
    assert_eq!(messages.last().map(|m| m.kind()), Some("error"));
    assert!(messages.iter().all(|m| m.kind() != "analysis_complete"));

    let report = orchestrator.get_analysis(&submission.id).await.unwrap();
    assert_eq!(report.status, SubmissionStatus::Failed);
    assert_eq!(report.results.len(), 3);
    assert!(report.submission.completed_at.is_some());

    let agents = orchestrator.list_agents().await.unwrap();
    for agent in agents {
        let expected = if agent.specialty == Specialty::Accessibility {
            AgentStatus::Error
        } else {
            AgentStatus::Idle
        };
        assert_eq!(agent.status, expected, "{}", agent.name);
    }
}

#[tokio::test]
async fn progress_stream_is_ordered_and_serializable() {
    let store: Arc<dyn AnalysisStore> = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        deps_with(Arc::new(BuiltinRuleLibrary::default())),
    );

    let submission = CodeSubmission::new("eval(x)".to_string(), "javascript".to_string(), None);
    store.create_submission(&submission).await.unwrap();
    let mut subscription = orchestrator.bus().subscribe(&submission.id);

    let outcome = orchestrator
        .run(&submission.id, Some(&[Specialty::Security, Specialty::Performance]))
        .await
        .unwrap();
    assert!(outcome.failed_agents.is_empty());

    let messages = drain(&mut subscription).await;
    assert_eq!(messages[0].kind(), "analysis_started");
    assert_eq!(messages.last().map(|m| m.kind()), Some("analysis_complete"));

    let mut last_percent = std::collections::HashMap::new();
    for message in &messages {
        if let ProgressMessage::AgentProgress(event) = message {
            let previous = last_percent.insert(event.agent_id.clone(), event.percent);
            assert!(previous.unwrap_or(0) <= event.percent);
        }
    }
    assert_eq!(last_percent.len(), 2);
    assert!(last_percent.values().all(|p| *p == 100));

    let json: serde_json::Value =
        serde_json::from_str(&messages.last().unwrap().to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "analysis_complete");
    assert_eq!(json["payload"]["submission_id"], submission.id.as_str());
    assert_eq!(json["payload"]["summary"]["total"], outcome.summary.total);
}

/// Memory store that holds the `completed` transition until released.
struct GatedStore {
    inner: MemoryStore,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AnalysisStore for GatedStore {
    async fn create_submission(&self, submission: &CodeSubmission) -> EngineResult<()> {
        self.inner.create_submission(submission).await
    }

    async fn get_submission(&self, id: &str) -> EngineResult<CodeSubmission> {
        self.inner.get_submission(id).await
    }

    async fn update_submission_status(&self, id: &str, status: SubmissionStatus) -> EngineResult<()> {
        if status == SubmissionStatus::Completed {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.update_submission_status(id, status).await
    }

    async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        self.inner.list_agents().await
    }

    async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()> {
        self.inner.set_agent_status(agent_id, status).await
    }

    async fn save_result(&self, result: &AnalysisResult) -> EngineResult<()> {
        self.inner.save_result(result).await
    }

    async fn results_for(&self, submission_id: &str) -> EngineResult<Vec<AnalysisResult>> {
        self.inner.results_for(submission_id).await
    }
}

#[tokio::test]
async fn late_subscriber_sees_only_completion() {
    let reached = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        reached: Arc::clone(&reached),
        release: Arc::clone(&release),
    });
    let intake = intake_with(store);

    let id = intake
        .start_analysis(NewSubmission::new("let total = 0;", "javascript"))
        .await
        .unwrap();

    // Every pipeline has finished once the run asks for `completed`.
    reached.notified().await;
    let mut subscription = intake.orchestrator().bus().subscribe(&id);
    release.notify_one();

    let messages = drain(&mut subscription).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind(), "analysis_complete");

    let report = intake.orchestrator().get_analysis(&id).await.unwrap();
    assert_eq!(report.status, SubmissionStatus::Completed);
}

#[tokio::test]
async fn sqlite_store_keeps_results_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("yoagents.db");

    let id = {
        let intake = intake_with(Arc::new(SqliteStore::open_at(&path).unwrap()));
        let report = intake
            .analyze(NewSubmission::new("x = eval(y)", "py").with_filename("job.py"))
            .await
            .unwrap();
        assert_eq!(report.status, SubmissionStatus::Completed);
        report.submission.id
    };

    let reopened = SqliteStore::open_at(&path).unwrap();
    let submission = reopened.get_submission(&id).await.unwrap();
    assert_eq!(submission.language, "python");
    assert_eq!(submission.status, SubmissionStatus::Completed);

    let results = reopened.results_for(&id).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .flat_map(|r| r.findings.iter())
        .any(|f| f.rule_id.as_deref() == Some("sec-any-eval")));
}

#[tokio::test]
async fn scanned_fixtures_analyze_in_their_languages() {
    use yoagents::scanner::{FileScanner, ScanConfig};

    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    let files = FileScanner::new(root, ScanConfig::default()).scan().unwrap();
    let found: Vec<_> = files
        .iter()
        .map(|f| (f.path.as_str(), f.language.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            ("clean.py", "python"),
            ("page.html", "html"),
            ("vulnerable.js", "javascript"),
        ]
    );

    let intake = intake_with(Arc::new(MemoryStore::new()));
    let clean = &files[0];
    let report = intake
        .analyze(NewSubmission::new(clean.read().unwrap(), clean.language.clone()).with_filename(clean.path.clone()))
        .await
        .unwrap();
    assert_eq!(report.status, SubmissionStatus::Completed);
    assert!(report.findings().all(|f| f.severity < Severity::Medium));
}
