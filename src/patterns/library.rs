//! Rule library: the source of [`CodePattern`]s for the rule-based stage.

use crate::error::{AnalysisError, EngineResult};
use crate::models::{CodePattern, Severity, Specialty};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Provides the rules tagged for a (language, specialty) pair.
#[async_trait]
pub trait RuleLibrary: Send + Sync {
    /// Rules for `language` and `specialty`, newest first, at most `limit`.
    async fn fetch_rules(
        &self,
        language: &str,
        specialty: Specialty,
        limit: usize,
    ) -> EngineResult<Vec<CodePattern>>;
}

/// In-process rule library seeded with the default rule set.
#[derive(Debug, Clone)]
pub struct BuiltinRuleLibrary {
    rules: Vec<CodePattern>,
}

impl Default for BuiltinRuleLibrary {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Shape of a rules file: a list of `[[rules]]` tables.
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<CodePattern>,
}

impl BuiltinRuleLibrary {
    /// A library holding exactly `rules`.
    pub fn with_rules(rules: Vec<CodePattern>) -> Self {
        Self { rules }
    }

    /// Add rules on top of the current set.
    pub fn extend(&mut self, rules: Vec<CodePattern>) {
        self.rules.extend(rules);
    }

    /// Load extra rules from a TOML file and add them to the default set.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;

        let file: RulesFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse rules file: {}", path.display()))?;

        let count = file.rules.len();
        self.extend(file.rules);
        info!("Loaded {} custom rules from {}", count, path.display());
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleLibrary for BuiltinRuleLibrary {
    async fn fetch_rules(
        &self,
        language: &str,
        specialty: Specialty,
        limit: usize,
    ) -> EngineResult<Vec<CodePattern>> {
        if limit == 0 {
            return Err(AnalysisError::RuleLibrary(
                "rule limit must be at least 1".to_string(),
            ));
        }

        let mut selected: Vec<CodePattern> = self
            .rules
            .iter()
            .filter(|r| r.category == specialty && r.applies_to(language))
            .cloned()
            .collect();

        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        selected.truncate(limit);

        debug!(
            "Fetched {} {} rules for language {}",
            selected.len(),
            specialty,
            language
        );
        Ok(selected)
    }
}

/// Built-in rules get strictly increasing timestamps in definition order, so
/// later entries sort first.
fn builtin_timestamp(index: usize) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    base + Duration::try_seconds(index as i64).unwrap_or_else(Duration::zero)
}

/// (id, specialty, severity, language, pattern, description, suggestion)
type RuleSpec = (
    &'static str,
    Specialty,
    Severity,
    &'static str,
    &'static str,
    &'static str,
    &'static str,
);

const DEFAULT_RULES: &[RuleSpec] = &[
    // Security
    (
        "sec-js-function-constructor",
        Specialty::Security,
        Severity::High,
        "javascript",
        r"new\s+Function\s*\(",
        "Function constructor evaluates strings as code",
        "Define the function statically",
    ),
    (
        "sec-js-innerhtml",
        Specialty::Security,
        Severity::High,
        "javascript",
        r"\.innerHTML\s*=",
        "Assigning innerHTML can introduce cross-site scripting",
        "Use textContent or sanitize the markup first",
    ),
    (
        "sec-js-document-write",
        Specialty::Security,
        Severity::Medium,
        "javascript",
        r"document\.write\s*\(",
        "document.write can inject untrusted markup",
        "Build DOM nodes with createElement",
    ),
    (
        "sec-js-string-timer",
        Specialty::Security,
        Severity::Medium,
        "javascript",
        r#"set(Timeout|Interval)\s*\(\s*["'`]"#,
        "Timer called with a string evaluates it as code",
        "Pass a function instead of a string",
    ),
    (
        "sec-py-exec",
        Specialty::Security,
        Severity::Critical,
        "python",
        r"\bexec\s*\(",
        "Use of exec() allows arbitrary code execution",
        "Avoid executing dynamically built code",
    ),
    (
        "sec-py-pickle",
        Specialty::Security,
        Severity::High,
        "python",
        r"pickle\.loads?\s*\(",
        "Unpickling untrusted data can execute code",
        "Use a data-only format such as JSON",
    ),
    (
        "sec-py-shell",
        Specialty::Security,
        Severity::High,
        "python",
        r"shell\s*=\s*True",
        "Subprocess with shell=True is open to command injection",
        "Pass an argument list and keep shell=False",
    ),
    (
        "sec-py-yaml-load",
        Specialty::Security,
        Severity::Medium,
        "python",
        r"yaml\.load\s*\(",
        "yaml.load can construct arbitrary objects",
        "Use yaml.safe_load",
    ),
    (
        "sec-any-eval",
        Specialty::Security,
        Severity::Critical,
        "*",
        r"eval\s*\(",
        "Use of eval() allows arbitrary code execution",
        "Parse the data with a real parser or dispatch on known names instead of eval",
    ),
    (
        "sec-any-secret",
        Specialty::Security,
        Severity::High,
        "*",
        r#"(password|passwd|secret|api[_-]?key|access[_-]?token)\s*[:=]\s*["'][^"']{4,}["']"#,
        "Hard-coded credential",
        "Load secrets from the environment or a secret manager",
    ),
    (
        "sec-any-private-key",
        Specialty::Security,
        Severity::Critical,
        "*",
        r"-----BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY-----",
        "Private key embedded in source",
        "Remove the key and rotate it",
    ),
    (
        "sec-any-weak-hash",
        Specialty::Security,
        Severity::Medium,
        "*",
        r"\b(md5|sha1)\s*\(",
        "Weak hash function",
        "Use SHA-256 or a password hash such as argon2",
    ),
    // Performance
    (
        "perf-js-json-clone",
        Specialty::Performance,
        Severity::Medium,
        "javascript",
        r"JSON\.parse\s*\(\s*JSON\.stringify",
        "Deep clone through JSON serialization is slow",
        "Use structuredClone or copy only what is needed",
    ),
    (
        "perf-js-sync-xhr",
        Specialty::Performance,
        Severity::Medium,
        "javascript",
        r"\.open\s*\([^)]*,\s*false\s*\)",
        "Synchronous XMLHttpRequest blocks the main thread",
        "Use fetch or an asynchronous request",
    ),
    (
        "perf-js-innerhtml-append",
        Specialty::Performance,
        Severity::Medium,
        "javascript",
        r"\.innerHTML\s*\+=",
        "Appending to innerHTML re-parses the whole element",
        "Build a fragment and append it once",
    ),
    (
        "perf-py-range-len",
        Specialty::Performance,
        Severity::Low,
        "python",
        r"for\s+\w+\s+in\s+range\s*\(\s*len\s*\(",
        "Indexing loop over range(len(...))",
        "Iterate directly or use enumerate()",
    ),
    (
        "perf-any-select-star",
        Specialty::Performance,
        Severity::Low,
        "*",
        r"SELECT\s+\*\s+FROM",
        "Query selects every column",
        "Select only the columns you need",
    ),
    (
        "perf-any-sleep",
        Specialty::Performance,
        Severity::Low,
        "*",
        r"\b(time\.)?sleep\s*\(",
        "Blocking sleep call",
        "Use a timer or asynchronous wait",
    ),
    // Accessibility
    (
        "a11y-any-marquee",
        Specialty::Accessibility,
        Severity::Medium,
        "*",
        r"<(marquee|blink)\b",
        "Moving or blinking content is hard to read",
        "Remove the element or let users pause it",
    ),
    (
        "a11y-any-outline-none",
        Specialty::Accessibility,
        Severity::Medium,
        "*",
        r"outline\s*:\s*(none|0)\b",
        "Focus outline removed",
        "Provide a visible :focus style",
    ),
    (
        "a11y-any-positive-tabindex",
        Specialty::Accessibility,
        Severity::Medium,
        "*",
        r#"tab[iI]ndex\s*=\s*["'{]?\s*[1-9]"#,
        "Positive tabindex breaks natural focus order",
        "Use tabindex 0 or -1",
    ),
    (
        "a11y-any-autoplay",
        Specialty::Accessibility,
        Severity::Low,
        "*",
        r"\bautoplay\b",
        "Autoplaying media",
        "Let users start playback",
    ),
    (
        "a11y-any-zoom-disabled",
        Specialty::Accessibility,
        Severity::Medium,
        "*",
        r"user-scalable\s*=\s*no|maximum-scale\s*=\s*1(\.0)?\b",
        "Viewport disables zooming",
        "Allow users to zoom",
    ),
    // Best practices
    (
        "bp-js-debugger",
        Specialty::BestPractices,
        Severity::Medium,
        "javascript",
        r"\bdebugger\b",
        "debugger statement left in code",
        "Remove the debugger statement",
    ),
    (
        "bp-js-console",
        Specialty::BestPractices,
        Severity::Low,
        "javascript",
        r"console\.(log|debug)\s*\(",
        "Console logging left in code",
        "Use a logger or remove the call",
    ),
    (
        "bp-js-empty-catch",
        Specialty::BestPractices,
        Severity::Medium,
        "javascript",
        r"catch\s*(\(\s*\w*\s*\))?\s*\{\s*\}",
        "Empty catch block swallows errors",
        "Handle or log the error",
    ),
    (
        "bp-ts-any",
        Specialty::BestPractices,
        Severity::Low,
        "typescript",
        r":\s*any\b",
        "Explicit any disables type checking",
        "Use a precise type or unknown",
    ),
    (
        "bp-py-bare-except",
        Specialty::BestPractices,
        Severity::Medium,
        "python",
        r"except\s*:",
        "Bare except catches everything, including KeyboardInterrupt",
        "Catch specific exceptions",
    ),
    (
        "bp-py-wildcard-import",
        Specialty::BestPractices,
        Severity::Low,
        "python",
        r"from\s+\S+\s+import\s+\*",
        "Wildcard import pollutes the namespace",
        "Import names explicitly",
    ),
    (
        "bp-py-print",
        Specialty::BestPractices,
        Severity::Info,
        "python",
        r"^\s*print\s*\(",
        "print() used for output",
        "Use the logging module",
    ),
];

/// The default rule set shipped with the engine.
pub fn default_rules() -> Vec<CodePattern> {
    DEFAULT_RULES
        .iter()
        .enumerate()
        .map(
            |(index, &(id, category, severity, language, pattern, description, suggestion))| {
                CodePattern {
                    id: id.to_string(),
                    pattern: pattern.to_string(),
                    category,
                    severity,
                    language: language.to_string(),
                    description: description.to_string(),
                    suggestion: Some(suggestion.to_string()),
                    created_at: builtin_timestamp(index),
                }
            },
        )
        .collect()
}
