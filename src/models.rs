//! Data models for the analysis engine.
//!
//! This module contains the core data structures shared by the pipelines,
//! the orchestrator and the stores: submissions, agents, findings, rules
//! and per-agent results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Identifier of a code submission (UUID v4 string).
pub type SubmissionId = String;

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - no action required
    Info,
    /// Low severity - style issues, minor suggestions
    Low,
    /// Medium severity - code quality issues, potential bugs
    Medium,
    /// High severity - bugs, security concerns
    High,
    /// Critical severity - security vulnerabilities, major bugs
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "🔵",
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }

    /// Weight used by the confidence scorer.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.6,
            Severity::Low => 0.4,
            Severity::Info => 0.2,
        }
    }

    /// Parse a severity label, falling back to `Medium` for anything unknown.
    ///
    /// Used for free-form model output where rejecting the whole finding
    /// would lose information.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Severity::Medium)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" | "moderate" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// The analysis role of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Specialty {
    Security,
    Performance,
    Accessibility,
    BestPractices,
}

impl Specialty {
    /// The full roster, in launch order.
    pub const ALL: [Specialty; 4] = [
        Specialty::Security,
        Specialty::Performance,
        Specialty::Accessibility,
        Specialty::BestPractices,
    ];

    /// Stable slug used in storage, rule categories and wire messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Security => "security",
            Specialty::Performance => "performance",
            Specialty::Accessibility => "accessibility",
            Specialty::BestPractices => "best-practices",
        }
    }

    /// Human-readable agent name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Specialty::Security => "Security Agent",
            Specialty::Performance => "Performance Agent",
            Specialty::Accessibility => "Accessibility Agent",
            Specialty::BestPractices => "Best Practices Agent",
        }
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Specialty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "security" => Ok(Specialty::Security),
            "performance" => Ok(Specialty::Performance),
            "accessibility" | "a11y" => Ok(Specialty::Accessibility),
            "best-practices" | "best_practices" | "bestpractices" => {
                Ok(Specialty::BestPractices)
            }
            other => Err(format!("unknown agent specialty: {}", other)),
        }
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Analyzing,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Analyzing => "analyzing",
            AgentStatus::Error => "error",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "analyzing" => Ok(AgentStatus::Analyzing),
            "error" => Ok(AgentStatus::Error),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Analyzing => "analyzing",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }

    /// Completed and failed submissions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }

    /// Whether `self -> next` respects pending -> analyzing -> {completed, failed}.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Pending, SubmissionStatus::Analyzing)
                | (SubmissionStatus::Analyzing, SubmissionStatus::Completed)
                | (SubmissionStatus::Analyzing, SubmissionStatus::Failed)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "analyzing" => Ok(SubmissionStatus::Analyzing),
            "completed" => Ok(SubmissionStatus::Completed),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(format!("unknown submission status: {}", other)),
        }
    }
}

/// A single issue found by one of the agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity of the finding.
    pub severity: Severity,
    /// Category (usually the agent specialty slug).
    pub category: String,
    /// What is wrong.
    pub message: String,
    /// Starting line (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    /// Ending line (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    /// Byte offset of the match start within the line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_start: Option<usize>,
    /// Byte offset of the match end within the line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_end: Option<usize>,
    /// Suggested fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Surrounding source lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    /// Rule that produced this finding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            line_start: None,
            line_end: None,
            column_start: None,
            column_end: None,
            suggestion: None,
            code_snippet: None,
            rule_id: None,
        }
    }

    /// Attach a single-line location.
    pub fn at_line(mut self, line: usize) -> Self {
        self.line_start = Some(line);
        self.line_end = Some(line);
        self
    }

    /// Attach a multi-line location.
    pub fn spanning(mut self, start: usize, end: usize) -> Self {
        self.line_start = Some(start);
        self.line_end = Some(end);
        self
    }

    pub fn with_columns(mut self, start: usize, end: usize) -> Self {
        self.column_start = Some(start);
        self.column_end = Some(end);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.code_snippet = Some(snippet.into());
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Returns the line range as a formatted string.
    pub fn line_range(&self) -> String {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) if end != start => format!("{}-{}", start, end),
            (Some(start), _) => start.to_string(),
            _ => "-".to_string(),
        }
    }
}

/// One unit of code accepted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub id: SubmissionId,
    pub code: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CodeSubmission {
    /// A fresh `pending` submission with a new identifier.
    pub fn new(code: String, language: String, filename: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            language,
            filename,
            status: SubmissionStatus::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Filename if known, else a placeholder for reports.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<inline>")
    }
}

/// One member of the analysis roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub specialty: Specialty,
    pub status: AgentStatus,
}

impl Agent {
    /// A new idle agent for the given specialty.
    pub fn new(specialty: Specialty) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: specialty.display_name().to_string(),
            specialty,
            status: AgentStatus::Idle,
        }
    }
}

/// Output of one agent pipeline for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub submission_id: SubmissionId,
    pub agent_id: String,
    pub agent_name: String,
    pub specialty: Specialty,
    /// Identifier of the logical per-agent isolation unit (bookkeeping only).
    pub fork_id: String,
    pub findings: Vec<Finding>,
    /// Always within [0, 1].
    pub confidence: f64,
    pub execution_time_ms: u64,
    /// Number of findings produced by the rule-based stage.
    pub pattern_matches: usize,
    pub created_at: DateTime<Utc>,
}

/// A detection rule owned by the rule library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePattern {
    pub id: String,
    /// Regular expression, or literal text when it is not valid regex.
    pub pattern: String,
    pub category: Specialty,
    pub severity: Severity,
    /// Language the rule applies to, or `*` for any language.
    pub language: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CodePattern {
    /// Whether this rule applies to `language` (case-insensitive).
    pub fn applies_to(&self, language: &str) -> bool {
        self.language == "*" || self.language.eq_ignore_ascii_case(language)
    }
}

/// Summary of findings across all agents of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Total number of findings.
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    /// Findings grouped by category.
    pub by_category: HashMap<String, usize>,
    /// Findings grouped by agent name.
    pub by_agent: HashMap<String, usize>,
}

impl AnalysisSummary {
    /// Creates a summary from a flat list of findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            summary.record(finding);
        }
        summary
    }

    /// Creates a summary by tallying every stored result.
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut summary = Self::default();

        for result in results {
            for finding in &result.findings {
                summary.record(finding);
            }
            *summary
                .by_agent
                .entry(result.agent_name.clone())
                .or_insert(0) += result.findings.len();
        }

        summary
    }

    fn record(&mut self, finding: &Finding) {
        self.total += 1;
        match finding.severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        *self
            .by_category
            .entry(finding.category.clone())
            .or_insert(0) += 1;
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

/// Read-back view of a submission: status, stored results and summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub submission: CodeSubmission,
    pub status: SubmissionStatus,
    pub results: Vec<AnalysisResult>,
    pub summary: AnalysisSummary,
}

impl AnalysisReport {
    /// All findings across agents, in result order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.results.iter().flat_map(|r| r.findings.iter())
    }
}

/// Metadata about one CLI run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// File or directory that was analyzed.
    pub target: String,
    pub analysis_date: DateTime<Utc>,
    /// Model used for the AI stage, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub agents: Vec<Specialty>,
    pub files_analyzed: usize,
    /// Submissions that ended `failed`.
    pub files_failed: usize,
    pub total_findings: usize,
    pub duration_seconds: f64,
}

/// Complete report over every submission of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub files: Vec<AnalysisReport>,
    /// Summary across all files.
    pub summary: AnalysisSummary,
    pub recommendations: Vec<String>,
}
