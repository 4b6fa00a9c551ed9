//! The shared agent pipeline: AI review, rule matching, heuristics.

use super::llm::{CompletionContext, CompletionService};
use super::specialty::{analyzer_for, HeuristicSettings, SpecialtyAnalyzer};
use crate::error::{AnalysisError, EngineResult};
use crate::models::{Agent, AnalysisResult, Finding, SubmissionId};
use crate::patterns::{PatternMatcher, RuleLibrary, DEFAULT_CONTEXT_LINES};
use crate::progress::{ProgressBus, ProgressEvent, ProgressMessage, ProgressPhase};
use crate::scoring;
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default number of rules fetched per run.
pub const DEFAULT_MAX_RULES: usize = 50;

/// Tunables shared by every pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub max_rules: usize,
    pub context_lines: usize,
    pub heuristics: HeuristicSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_rules: DEFAULT_MAX_RULES,
            context_lines: DEFAULT_CONTEXT_LINES,
            heuristics: HeuristicSettings::default(),
        }
    }
}

/// Collaborators a pipeline needs, shared across runs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub llm: Arc<dyn CompletionService>,
    pub rules: Arc<dyn RuleLibrary>,
    pub bus: Arc<ProgressBus>,
}

/// Findings of one run with the number that came from rules.
#[derive(Debug, Clone, PartialEq)]
struct StageOutput {
    findings: Vec<Finding>,
    pattern_matches: usize,
}

/// One agent analyzing one submission.
pub struct AgentPipeline {
    submission_id: SubmissionId,
    filename: Option<String>,
    agent: Agent,
    analyzer: Box<dyn SpecialtyAnalyzer>,
    deps: PipelineDeps,
    matcher: PatternMatcher,
    settings: PipelineSettings,
    percent: AtomicU8,
}

impl AgentPipeline {
    pub fn new(
        submission_id: impl Into<SubmissionId>,
        agent: Agent,
        deps: PipelineDeps,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            filename: None,
            analyzer: analyzer_for(agent.specialty),
            agent,
            deps,
            matcher: PatternMatcher::new(settings.context_lines),
            settings,
            percent: AtomicU8::new(0),
        }
    }

    /// Filename passed to the AI stage as context.
    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Run every stage and return the findings in stage order.
    pub async fn analyze(&self, code: &str, language: &str) -> EngineResult<Vec<Finding>> {
        Ok(self.execute(code, language).await?.findings)
    }

    /// Run every stage and package the outcome as a result for storage.
    pub async fn run(&self, code: &str, language: &str) -> EngineResult<AnalysisResult> {
        let started = Instant::now();
        let output = self.execute(code, language).await?;

        Ok(AnalysisResult {
            submission_id: self.submission_id.clone(),
            agent_id: self.agent.id.clone(),
            agent_name: self.agent.name.clone(),
            specialty: self.agent.specialty,
            fork_id: uuid::Uuid::new_v4().to_string(),
            confidence: scoring::confidence(&output.findings),
            findings: output.findings,
            execution_time_ms: started.elapsed().as_millis() as u64,
            pattern_matches: output.pattern_matches,
            created_at: Utc::now(),
        })
    }

    /// Publish a progress event for this agent.
    ///
    /// Percent never goes backwards: a lower value is raised to the last one reported.
    pub fn report_progress(
        &self,
        phase: ProgressPhase,
        percent: u8,
        step: Option<&str>,
        error: Option<String>,
    ) {
        let percent = percent.min(100);
        let previous = self.percent.fetch_max(percent, Ordering::SeqCst);

        self.deps
            .bus
            .publish(ProgressMessage::AgentProgress(ProgressEvent {
                submission_id: self.submission_id.clone(),
                agent_id: self.agent.id.clone(),
                agent_name: self.agent.name.clone(),
                phase,
                percent: percent.max(previous),
                step: step.map(str::to_string),
                error,
            }));
    }

    async fn execute(&self, code: &str, language: &str) -> EngineResult<StageOutput> {
        self.report_progress(ProgressPhase::Started, 0, Some("Starting analysis"), None);

        match self.stages(code, language).await {
            Ok(output) => {
                debug!(
                    "{} produced {} findings ({} from rules)",
                    self.agent.name,
                    output.findings.len(),
                    output.pattern_matches
                );
                self.report_progress(ProgressPhase::Completed, 100, Some("Analysis complete"), None);
                Ok(output)
            }
            Err(e) => {
                let e = e.for_agent(&self.agent.name);
                warn!("{}", e);
                let percent = self.percent.load(Ordering::SeqCst);
                self.report_progress(ProgressPhase::Failed, percent, None, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn stages(&self, code: &str, language: &str) -> EngineResult<StageOutput> {
        let specialty = self.agent.specialty;
        let mut findings = Vec::new();

        if self.deps.llm.is_enabled() {
            self.report_progress(ProgressPhase::Analyzing, 10, Some("Running AI review"), None);

            let context = CompletionContext {
                system_prompt: self.analyzer.system_prompt().to_string(),
                filename: self.filename.clone(),
            };
            match self.deps.llm.complete(specialty, code, language, &context).await {
                Ok(mut ai_findings) => findings.append(&mut ai_findings),
                Err(e) => warn!("AI review failed for {}: {:#}", self.agent.name, e),
            }

            self.report_progress(ProgressPhase::Analyzing, 40, Some("AI review complete"), None);
        }

        self.report_progress(ProgressPhase::Searching, 50, Some("Matching rules"), None);
        let rules = self
            .deps
            .rules
            .fetch_rules(language, specialty, self.settings.max_rules)
            .await?;
        let mut matched = self.matcher.scan(code, &rules);
        let pattern_matches = matched.len();
        findings.append(&mut matched);

        self.report_progress(ProgressPhase::Analyzing, 80, Some("Running heuristics"), None);
        let analyzer = &self.analyzer;
        let heuristics = &self.settings.heuristics;
        let mut heuristic_findings = panic::catch_unwind(AssertUnwindSafe(|| {
            analyzer.heuristics(code, language, heuristics)
        }))
        .map_err(|_| AnalysisError::AgentExecution {
            agent: self.agent.name.clone(),
            message: "heuristic checks panicked".to_string(),
        })?;
        findings.append(&mut heuristic_findings);

        Ok(StageOutput {
            findings,
            pattern_matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::DisabledCompletion;
    use crate::models::{CodePattern, Severity, Specialty};
    use crate::patterns::BuiltinRuleLibrary;
    use crate::progress::Subscription;
    use async_trait::async_trait;

    struct FixedCompletion(Vec<Finding>);

    #[async_trait]
    impl CompletionService for FixedCompletion {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _specialty: Specialty,
            _code: &str,
            _language: &str,
            _context: &CompletionContext,
        ) -> anyhow::Result<Vec<Finding>> {
            Ok(self.0.clone())
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn complete(
            &self,
            _specialty: Specialty,
            _code: &str,
            _language: &str,
            _context: &CompletionContext,
        ) -> anyhow::Result<Vec<Finding>> {
            Err(anyhow::anyhow!("model offline"))
        }
    }

    struct BrokenLibrary;

    #[async_trait]
    impl RuleLibrary for BrokenLibrary {
        async fn fetch_rules(
            &self,
            _language: &str,
            _specialty: Specialty,
            _limit: usize,
        ) -> EngineResult<Vec<CodePattern>> {
            Err(AnalysisError::RuleLibrary("connection refused".to_string()))
        }
    }

    fn pipeline(
        specialty: Specialty,
        llm: Arc<dyn CompletionService>,
        rules: Arc<dyn RuleLibrary>,
    ) -> (AgentPipeline, Subscription) {
        let bus = Arc::new(ProgressBus::default());
        let subscription = bus.subscribe("sub-1");
        let deps = PipelineDeps { llm, rules, bus };
        let pipeline = AgentPipeline::new(
            "sub-1",
            Agent::new(specialty),
            deps,
            PipelineSettings::default(),
        );
        (pipeline, subscription)
    }

    fn drain(subscription: &mut Subscription) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(message) = subscription.try_recv() {
            if let ProgressMessage::AgentProgress(event) = message {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_eval_is_critical_security_finding() {
        let (pipeline, _sub) = pipeline(
            Specialty::Security,
            Arc::new(DisabledCompletion),
            Arc::new(BuiltinRuleLibrary::default()),
        );

        let findings = pipeline
            .analyze("const result = eval(data.input);", "javascript")
            .await
            .unwrap();

        let eval = findings
            .iter()
            .find(|f| f.severity == Severity::Critical)
            .expect("critical finding");
        assert_eq!(eval.category, "security");
        assert_eq!(eval.line_start, Some(1));
        assert!(eval.message.contains("eval"));
    }

    #[tokio::test]
    async fn test_any_eval_call_is_critical() {
        let cases = [
            ("const r = safe_eval(x);", "javascript"),
            ("const r = myeval(x);", "typescript"),
            ("value = literal_eval(text)", "python"),
            ("eval (payload)", "ruby"),
            ("$out = eval($code);", "php"),
            ("EVAL(x)", "text"),
        ];

        for (code, language) in cases {
            let (pipeline, _sub) = pipeline(
                Specialty::Security,
                Arc::new(DisabledCompletion),
                Arc::new(BuiltinRuleLibrary::default()),
            );
            let findings = pipeline.analyze(code, language).await.unwrap();
            assert!(
                findings
                    .iter()
                    .any(|f| f.severity == Severity::Critical && f.message.contains("eval")),
                "no critical eval finding for {:?} ({})",
                code,
                language
            );
        }
    }

    #[tokio::test]
    async fn test_progress_schedule_without_ai() {
        let (pipeline, mut sub) = pipeline(
            Specialty::BestPractices,
            Arc::new(DisabledCompletion),
            Arc::new(BuiltinRuleLibrary::default()),
        );
        pipeline.analyze("console.log(\"hi\")", "javascript").await.unwrap();

        let events = drain(&mut sub);
        let schedule: Vec<_> = events.iter().map(|e| (e.phase, e.percent)).collect();
        assert_eq!(
            schedule,
            vec![
                (ProgressPhase::Started, 0),
                (ProgressPhase::Searching, 50),
                (ProgressPhase::Analyzing, 80),
                (ProgressPhase::Completed, 100),
            ]
        );
        assert!(events.iter().all(|e| e.agent_name == "Best Practices Agent"));
    }

    #[tokio::test]
    async fn test_ai_findings_come_first() {
        let ai = Finding::new(Severity::High, "security", "Token logged").at_line(1);
        let (pipeline, mut sub) = pipeline(
            Specialty::Security,
            Arc::new(FixedCompletion(vec![ai.clone()])),
            Arc::new(BuiltinRuleLibrary::default()),
        );

        let result = pipeline
            .run("const result = eval(data.input);", "javascript")
            .await
            .unwrap();
        assert_eq!(result.findings[0], ai);
        assert!(result.findings.len() > 1);
        assert_eq!(result.pattern_matches, result.findings.len() - 1);
        assert!((0.0..=1.0).contains(&result.confidence));

        let percents: Vec<_> = drain(&mut sub).iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 10, 40, 50, 80, 100]);
    }

    #[tokio::test]
    async fn test_ai_failure_is_swallowed() {
        let (pipeline, _sub) = pipeline(
            Specialty::Security,
            Arc::new(FailingCompletion),
            Arc::new(BuiltinRuleLibrary::default()),
        );

        let findings = pipeline
            .analyze("const result = eval(data.input);", "javascript")
            .await
            .unwrap();
        assert!(findings.iter().any(|f| f.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn test_rule_library_failure_fails_pipeline() {
        let (pipeline, mut sub) = pipeline(
            Specialty::Performance,
            Arc::new(DisabledCompletion),
            Arc::new(BrokenLibrary),
        );

        let err = pipeline.analyze("x", "javascript").await.unwrap_err();
        assert!(matches!(err, AnalysisError::AgentExecution { ref agent, .. } if agent == "Performance Agent"));

        let events = drain(&mut sub);
        let last = events.last().unwrap();
        assert_eq!(last.phase, ProgressPhase::Failed);
        assert_eq!(last.percent, 50);
        assert!(last.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_clean_code_has_full_confidence() {
        let (pipeline, _sub) = pipeline(
            Specialty::Accessibility,
            Arc::new(DisabledCompletion),
            Arc::new(BuiltinRuleLibrary::default()),
        );

        let result = pipeline.run("let total = 1;", "javascript").await.unwrap();
        assert!(result.findings.is_empty());
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.pattern_matches, 0);
        assert_eq!(result.submission_id, "sub-1");
    }
}
