//! Fan-out of agent pipelines for one submission and the join barrier.

use crate::agent::{AgentPipeline, PipelineDeps, PipelineSettings};
use crate::error::{AnalysisError, EngineResult};
use crate::models::{
    Agent, AgentStatus, AnalysisReport, AnalysisResult, AnalysisSummary, CodeSubmission,
    Specialty, SubmissionId, SubmissionStatus,
};
use crate::progress::{ProgressBus, ProgressMessage};
use crate::store::AnalysisStore;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How pipeline outcomes decide the submission's final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Any failed pipeline fails the submission.
    #[default]
    AllOrNothing,
    /// The submission fails only when no pipeline succeeded.
    PartialSuccess,
}

impl JoinPolicy {
    pub fn is_failure(&self, succeeded: usize, failed: usize) -> bool {
        match self {
            JoinPolicy::AllOrNothing => failed > 0,
            JoinPolicy::PartialSuccess => failed > 0 && succeeded == 0,
        }
    }
}

/// What a completed run reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub submission_id: SubmissionId,
    pub execution_time_ms: u64,
    pub summary: AnalysisSummary,
    /// Agents that failed but did not fail the submission.
    pub failed_agents: Vec<String>,
}

/// Per-agent count of pipelines in flight across submissions.
///
/// The stored agent status only changes when the count leaves or returns to
/// zero, so overlapping submissions never flip a busy agent to idle. Each
/// agent has its own lock, held across that agent's status write so writes
/// land in count order; different agents never wait on each other.
#[derive(Debug, Default)]
struct AgentTracker {
    agents: std::sync::Mutex<HashMap<String, Arc<Mutex<usize>>>>,
}

impl AgentTracker {
    fn slot(&self, agent_id: &str) -> Arc<Mutex<usize>> {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(agents.entry(agent_id.to_string()).or_default())
    }

    async fn begin(&self, store: &dyn AnalysisStore, agent: &Agent) -> EngineResult<()> {
        let slot = self.slot(&agent.id);
        let mut count = slot.lock().await;
        if *count == 0 {
            store.set_agent_status(&agent.id, AgentStatus::Analyzing).await?;
        }
        *count += 1;
        Ok(())
    }

    async fn finish(&self, store: &dyn AnalysisStore, agent: &Agent, status: AgentStatus) {
        let slot = self.slot(&agent.id);
        let mut count = slot.lock().await;
        *count = count.saturating_sub(1);

        if *count == 0 {
            if let Err(e) = store.set_agent_status(&agent.id, status).await {
                warn!("Failed to reset status of {}: {}", agent.name, e);
            }
        }
    }

    async fn in_flight(&self, agent_id: &str) -> usize {
        *self.slot(agent_id).lock().await
    }
}

/// Runs the agent roster over submissions.
pub struct Orchestrator {
    store: Arc<dyn AnalysisStore>,
    deps: PipelineDeps,
    settings: PipelineSettings,
    policy: JoinPolicy,
    tracker: Arc<AgentTracker>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn AnalysisStore>, deps: PipelineDeps) -> Self {
        Self {
            store,
            deps,
            settings: PipelineSettings::default(),
            policy: JoinPolicy::default(),
            tracker: Arc::new(AgentTracker::default()),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.deps.bus
    }

    /// Number of pipelines currently running for `agent_id`.
    pub async fn in_flight(&self, agent_id: &str) -> usize {
        self.tracker.in_flight(agent_id).await
    }

    /// Analyze a pending submission with every agent, or only `agents`.
    ///
    /// Results are stored as each pipeline finishes. The submission ends
    /// `completed` or `failed` according to the join policy; results already
    /// stored are kept either way.
    pub async fn run(
        &self,
        submission_id: &str,
        agents: Option<&[Specialty]>,
    ) -> EngineResult<RunOutcome> {
        let started = Instant::now();
        let submission = self.store.get_submission(submission_id).await?;
        self.store
            .update_submission_status(submission_id, SubmissionStatus::Analyzing)
            .await?;

        let outcome = match self.select_agents(agents).await {
            Ok(selected) => self.fan_out(&submission, selected).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok((results, failures)) => {
                let failed = self.policy.is_failure(results.len(), failures.len());
                if failed {
                    let (_, first) = failures
                        .into_iter()
                        .next()
                        .ok_or_else(|| AnalysisError::store("join reported failure without errors"))?;
                    self.fail(submission_id, &first).await;
                    return Err(first);
                }

                let summary = AnalysisSummary::from_results(&results);
                let execution_time_ms = started.elapsed().as_millis() as u64;
                let failed_agents: Vec<String> =
                    failures.into_iter().map(|(name, _)| name).collect();

                if let Err(e) = self
                    .store
                    .update_submission_status(submission_id, SubmissionStatus::Completed)
                    .await
                {
                    self.fail(submission_id, &e).await;
                    return Err(e);
                }

                info!(
                    "Submission {} completed: {} findings in {}ms",
                    submission_id, summary.total, execution_time_ms
                );

                self.deps.bus.publish(ProgressMessage::AnalysisComplete {
                    submission_id: submission_id.to_string(),
                    execution_time_ms,
                    summary: summary.clone(),
                    failed_agents: failed_agents.clone(),
                });
                self.deps.bus.close(submission_id);

                Ok(RunOutcome {
                    submission_id: submission_id.to_string(),
                    execution_time_ms,
                    summary,
                    failed_agents,
                })
            }
            Err(e) => {
                self.fail(submission_id, &e).await;
                Err(e)
            }
        }
    }

    /// The submission, its stored results and a freshly computed summary.
    pub async fn get_analysis(&self, submission_id: &str) -> EngineResult<AnalysisReport> {
        let submission = self.store.get_submission(submission_id).await?;
        let results = self.store.results_for(submission_id).await?;
        let summary = AnalysisSummary::from_results(&results);

        Ok(AnalysisReport {
            status: submission.status,
            submission,
            results,
            summary,
        })
    }

    pub async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
        self.store.list_agents().await
    }

    async fn select_agents(&self, agents: Option<&[Specialty]>) -> EngineResult<Vec<Agent>> {
        let roster = self.store.list_agents().await?;
        let selected: Vec<Agent> = match agents {
            None => roster,
            Some(wanted) => roster
                .into_iter()
                .filter(|a| wanted.contains(&a.specialty))
                .collect(),
        };

        if selected.is_empty() {
            return Err(AnalysisError::Validation(
                "no agents selected for analysis".to_string(),
            ));
        }
        Ok(selected)
    }

    async fn fan_out(
        &self,
        submission: &CodeSubmission,
        agents: Vec<Agent>,
    ) -> EngineResult<(Vec<AnalysisResult>, Vec<(String, AnalysisError)>)> {
        self.deps.bus.publish(ProgressMessage::AnalysisStarted {
            submission_id: submission.id.clone(),
            agents: agents.iter().map(|a| a.name.clone()).collect(),
        });

        let code: Arc<str> = Arc::from(submission.code.as_str());
        let language: Arc<str> = Arc::from(submission.language.as_str());
        let mut set = JoinSet::new();

        for agent in agents {
            let store = Arc::clone(&self.store);
            let tracker = Arc::clone(&self.tracker);
            let pipeline = AgentPipeline::new(
                submission.id.clone(),
                agent.clone(),
                self.deps.clone(),
                self.settings,
            )
            .with_filename(submission.filename.clone());
            let code = Arc::clone(&code);
            let language = Arc::clone(&language);

            set.spawn(async move {
                let name = agent.name.clone();
                if let Err(e) = tracker.begin(store.as_ref(), &agent).await {
                    return (name, Err(e.for_agent(&agent.name)));
                }

                let work = async {
                    let result = pipeline.run(&code, &language).await?;
                    store.save_result(&result).await?;
                    Ok::<_, AnalysisError>(result)
                };
                let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(outcome) => outcome.map_err(|e| e.for_agent(&agent.name)),
                    Err(_) => Err(AnalysisError::AgentExecution {
                        agent: agent.name.clone(),
                        message: "pipeline panicked".to_string(),
                    }),
                };

                let status = if outcome.is_ok() {
                    AgentStatus::Idle
                } else {
                    AgentStatus::Error
                };
                tracker.finish(store.as_ref(), &agent, status).await;

                (name, outcome)
            });
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(result))) => {
                    debug!("{} finished with {} findings", name, result.findings.len());
                    results.push(result);
                }
                Ok((name, Err(e))) => {
                    error!("{}", e);
                    failures.push((name, e));
                }
                Err(e) => {
                    error!("Pipeline task did not complete: {}", e);
                    failures.push((
                        "unknown".to_string(),
                        AnalysisError::AgentExecution {
                            agent: "unknown".to_string(),
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }

        Ok((results, failures))
    }

    async fn fail(&self, submission_id: &str, cause: &AnalysisError) {
        if let Err(e) = self
            .store
            .update_submission_status(submission_id, SubmissionStatus::Failed)
            .await
        {
            warn!("Could not mark submission {} failed: {}", submission_id, e);
        }

        error!("Submission {} failed: {}", submission_id, cause);
        self.deps.bus.publish(ProgressMessage::Error {
            submission_id: submission_id.to_string(),
            message: cause.to_string(),
        });
        self.deps.bus.close(submission_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DisabledCompletion;
    use crate::models::CodePattern;
    use crate::patterns::{BuiltinRuleLibrary, RuleLibrary};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Fails rule fetches for one specialty only.
    struct FlakyLibrary {
        inner: BuiltinRuleLibrary,
        broken: Specialty,
    }

    #[async_trait]
    impl RuleLibrary for FlakyLibrary {
        async fn fetch_rules(
            &self,
            language: &str,
            specialty: Specialty,
            limit: usize,
        ) -> EngineResult<Vec<CodePattern>> {
            if specialty == self.broken {
                return Err(AnalysisError::RuleLibrary("rules offline".to_string()));
            }
            self.inner.fetch_rules(language, specialty, limit).await
        }
    }

    fn orchestrator(rules: Arc<dyn RuleLibrary>) -> Orchestrator {
        let deps = PipelineDeps {
            llm: Arc::new(DisabledCompletion),
            rules,
            bus: Arc::new(ProgressBus::default()),
        };
        Orchestrator::new(Arc::new(MemoryStore::new()), deps)
    }

    async fn submit(orchestrator: &Orchestrator, code: &str) -> SubmissionId {
        let submission = CodeSubmission::new(code.to_string(), "javascript".to_string(), None);
        orchestrator.store().create_submission(&submission).await.unwrap();
        submission.id
    }

    #[test]
    fn test_join_policy() {
        assert!(JoinPolicy::AllOrNothing.is_failure(3, 1));
        assert!(!JoinPolicy::AllOrNothing.is_failure(4, 0));
        assert!(!JoinPolicy::PartialSuccess.is_failure(3, 1));
        assert!(JoinPolicy::PartialSuccess.is_failure(0, 4));
    }

    #[tokio::test]
    async fn test_run_stores_one_result_per_agent() {
        let orchestrator = orchestrator(Arc::new(BuiltinRuleLibrary::default()));
        let id = submit(&orchestrator, "const result = eval(data.input);\nif (a == b) {}").await;

        let outcome = orchestrator.run(&id, None).await.unwrap();

        let report = orchestrator.get_analysis(&id).await.unwrap();
        assert_eq!(report.status, SubmissionStatus::Completed);
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.summary, outcome.summary);
        assert!(report.summary.critical >= 1);

        let per_agent: usize = report.results.iter().map(|r| r.findings.len()).sum();
        assert_eq!(report.summary.total, per_agent);

        let agents = orchestrator.list_agents().await.unwrap();
        assert!(agents.iter().all(|a| a.status == AgentStatus::Idle));
        for agent in &agents {
            assert_eq!(orchestrator.in_flight(&agent.id).await, 0);
        }
    }

    #[tokio::test]
    async fn test_run_with_agent_subset() {
        let orchestrator = orchestrator(Arc::new(BuiltinRuleLibrary::default()));
        let id = submit(&orchestrator, "console.log(\"hi\")").await;

        orchestrator
            .run(&id, Some(&[Specialty::Security, Specialty::BestPractices]))
            .await
            .unwrap();

        let report = orchestrator.get_analysis(&id).await.unwrap();
        let mut specialties: Vec<_> = report.results.iter().map(|r| r.specialty).collect();
        specialties.sort();
        assert_eq!(specialties, vec![Specialty::Security, Specialty::BestPractices]);
        assert!(report.findings().all(|f| f.severity != crate::models::Severity::Critical));
    }

    #[tokio::test]
    async fn test_one_failure_fails_submission_but_keeps_results() {
        let orchestrator = orchestrator(Arc::new(FlakyLibrary {
            inner: BuiltinRuleLibrary::default(),
            broken: Specialty::Performance,
        }));
        let id = submit(&orchestrator, "const result = eval(data.input);").await;
        let mut sub = orchestrator.bus().subscribe(&id);

        let err = orchestrator.run(&id, None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::AgentExecution { ref agent, .. } if agent == "Performance Agent"));

        let report = orchestrator.get_analysis(&id).await.unwrap();
        assert_eq!(report.status, SubmissionStatus::Failed);
        assert_eq!(report.results.len(), 3);

        let agents = orchestrator.list_agents().await.unwrap();
        let performance = agents
            .iter()
            .find(|a| a.specialty == Specialty::Performance)
            .unwrap();
        assert_eq!(performance.status, AgentStatus::Error);

        let mut kinds = Vec::new();
        while let Some(message) = sub.recv().await {
            kinds.push(message.kind());
        }
        assert_eq!(kinds.first(), Some(&"analysis_started"));
        assert_eq!(kinds.last(), Some(&"error"));
        assert!(!kinds.contains(&"analysis_complete"));
    }

    #[tokio::test]
    async fn test_partial_success_policy_completes() {
        let orchestrator = orchestrator(Arc::new(FlakyLibrary {
            inner: BuiltinRuleLibrary::default(),
            broken: Specialty::Accessibility,
        }))
        .with_policy(JoinPolicy::PartialSuccess);
        let id = submit(&orchestrator, "var x = 1;").await;
        let mut sub = orchestrator.bus().subscribe(&id);

        let outcome = orchestrator.run(&id, None).await.unwrap();
        assert_eq!(outcome.failed_agents, vec!["Accessibility Agent".to_string()]);

        let report = orchestrator.get_analysis(&id).await.unwrap();
        assert_eq!(report.status, SubmissionStatus::Completed);
        assert_eq!(report.results.len(), 3);

        let mut last = None;
        while let Some(message) = sub.recv().await {
            last = Some(message);
        }
        match last {
            Some(ProgressMessage::AnalysisComplete { failed_agents, .. }) => {
                assert_eq!(failed_agents, vec!["Accessibility Agent".to_string()]);
            }
            other => panic!("unexpected final message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_rejects_non_pending_submission() {
        let orchestrator = orchestrator(Arc::new(BuiltinRuleLibrary::default()));
        let id = submit(&orchestrator, "let a = 1;").await;

        orchestrator.run(&id, None).await.unwrap();
        let err = orchestrator.run(&id, None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTransition { .. }));

        assert!(matches!(
            orchestrator.run("missing", None).await,
            Err(AnalysisError::NotFound(_))
        ));
    }

    /// Holds status writes for one agent until released.
    struct SlowAgentStore {
        inner: MemoryStore,
        slow_agent: String,
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl AnalysisStore for SlowAgentStore {
        async fn create_submission(&self, submission: &CodeSubmission) -> EngineResult<()> {
            self.inner.create_submission(submission).await
        }

        async fn get_submission(&self, id: &str) -> EngineResult<CodeSubmission> {
            self.inner.get_submission(id).await
        }

        async fn update_submission_status(
            &self,
            id: &str,
            status: SubmissionStatus,
        ) -> EngineResult<()> {
            self.inner.update_submission_status(id, status).await
        }

        async fn list_agents(&self) -> EngineResult<Vec<Agent>> {
            self.inner.list_agents().await
        }

        async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()> {
            if agent_id == self.slow_agent {
                self.reached.notify_one();
                self.release.notified().await;
            }
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
    async fn test_slow_status_write_does_not_block_other_agents() {
        let inner = MemoryStore::new();
        let agents = inner.list_agents().await.unwrap();
        let (security, performance) = (agents[0].clone(), agents[1].clone());
        let store = Arc::new(SlowAgentStore {
            inner,
            slow_agent: security.id.clone(),
            reached: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let tracker = Arc::new(AgentTracker::default());

        let stuck = tokio::spawn({
            let (tracker, store, security) = (Arc::clone(&tracker), Arc::clone(&store), security.clone());
            async move { tracker.begin(store.as_ref(), &security).await }
        });
        store.reached.notified().await;

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            tracker.begin(store.as_ref(), &performance),
        )
        .await
        .expect("other agent waited on the slow write")
        .unwrap();
        assert_eq!(tracker.in_flight(&performance.id).await, 1);

        store.release.notify_one();
        stuck.await.unwrap().unwrap();
        assert_eq!(tracker.in_flight(&security.id).await, 1);

        let statuses: Vec<_> = store.list_agents().await.unwrap().iter().map(|a| a.status).collect();
        assert_eq!(statuses[0], AgentStatus::Analyzing);
        assert_eq!(statuses[1], AgentStatus::Analyzing);
    }

    #[tokio::test]
    async fn test_overlapping_runs_keep_agents_busy() {
        let orchestrator = orchestrator(Arc::new(BuiltinRuleLibrary::default()));
        let agents = orchestrator.list_agents().await.unwrap();
        let security = agents[0].clone();
        let store = Arc::clone(orchestrator.store());

        orchestrator.tracker.begin(store.as_ref(), &security).await.unwrap();
        orchestrator.tracker.begin(store.as_ref(), &security).await.unwrap();
        assert_eq!(orchestrator.in_flight(&security.id).await, 2);

        orchestrator
            .tracker
            .finish(store.as_ref(), &security, AgentStatus::Idle)
            .await;
        let status = store.list_agents().await.unwrap()[0].status;
        assert_eq!(status, AgentStatus::Analyzing);

        orchestrator
            .tracker
            .finish(store.as_ref(), &security, AgentStatus::Idle)
            .await;
        let status = store.list_agents().await.unwrap()[0].status;
        assert_eq!(status, AgentStatus::Idle);
    }
}
