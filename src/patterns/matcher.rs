//! Line-oriented rule matching.
//!
//! Rules come from a library we do not control, so compiling one must never
//! fail: anything that is not a usable regular expression is matched as
//! literal text instead.

use crate::models::{CodePattern, Finding};
use regex::{Regex, RegexBuilder};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Default number of context lines on each side of a match.
pub const DEFAULT_CONTEXT_LINES: usize = 2;

/// A compiled rule text.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// The rule text compiled as a case-insensitive regex.
    Regex(Regex),
    /// The rule text escaped and compiled as a case-insensitive literal.
    Literal(Regex),
    /// Plain ASCII-case-insensitive substring search (last resort).
    Substring(String),
}

impl RuleMatcher {
    /// Compile `text`, degrading to literal matching when it is not valid regex.
    ///
    /// Never fails.
    pub fn compile(text: &str) -> Self {
        if !has_stacked_quantifier(text) {
            match build_case_insensitive(text) {
                Ok(re) => return RuleMatcher::Regex(re),
                Err(e) => debug!("Rule {:?} is not a valid regex ({}), using literal match", text, e),
            }
        } else {
            debug!("Rule {:?} stacks quantifiers, using literal match", text);
        }

        match build_case_insensitive(&regex::escape(text)) {
            Ok(re) => RuleMatcher::Literal(re),
            Err(e) => {
                debug!("Literal regex for {:?} failed ({}), using substring search", text, e);
                RuleMatcher::Substring(text.to_ascii_lowercase())
            }
        }
    }

    /// Whether the rule text was used verbatim as a regex.
    pub fn is_regex(&self) -> bool {
        matches!(self, RuleMatcher::Regex(_))
    }

    /// Byte ranges of every non-empty match in `line`, left to right.
    pub fn find_all(&self, line: &str) -> Vec<(usize, usize)> {
        match self {
            RuleMatcher::Regex(re) | RuleMatcher::Literal(re) => re
                .find_iter(line)
                .filter(|m| !m.as_str().is_empty())
                .map(|m| (m.start(), m.end()))
                .collect(),
            RuleMatcher::Substring(needle) => {
                if needle.is_empty() {
                    return Vec::new();
                }
                let haystack = line.to_ascii_lowercase();
                haystack
                    .match_indices(needle.as_str())
                    .map(|(start, m)| (start, start + m.len()))
                    .collect()
            }
        }
    }
}

fn build_case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Detect a quantifier applied directly to another quantifier (`i++`, `a*+`, `x{2}*`).
///
/// The `regex` crate accepts these as nested repetition, but rule authors
/// write them meaning literal code such as `i++`, and most regex dialects
/// reject them. A lazy `?` suffix (`a+?`) is allowed once.
fn has_stacked_quantifier(text: &str) -> bool {
    let mut chars = text.chars().peekable();
    let mut in_class = false;
    let mut after_quantifier = false;
    let mut lazy_allowed = false;

    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
            after_quantifier = false;
            continue;
        }
        if in_class {
            if c == ']' {
                in_class = false;
            }
            continue;
        }

        match c {
            '[' => {
                in_class = true;
                after_quantifier = false;
            }
            '*' | '+' => {
                if after_quantifier {
                    return true;
                }
                after_quantifier = true;
                lazy_allowed = true;
            }
            '?' => {
                if after_quantifier {
                    if !lazy_allowed {
                        return true;
                    }
                    lazy_allowed = false;
                } else {
                    after_quantifier = true;
                    lazy_allowed = true;
                }
            }
            '{' if after_quantifier && chars.peek().is_some_and(|n| n.is_ascii_digit()) => {
                return true;
            }
            '}' => {
                after_quantifier = true;
                lazy_allowed = true;
            }
            _ => after_quantifier = false,
        }
    }

    false
}

/// Scans source text with a set of rules.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    context_lines: usize,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LINES)
    }
}

impl PatternMatcher {
    pub fn new(context_lines: usize) -> Self {
        Self { context_lines }
    }

    /// Run every rule over `code`.
    ///
    /// Findings come out in rule order, then line order, then match order
    /// within a line. A rule that panics while scanning is logged and skipped.
    pub fn scan(&self, code: &str, rules: &[CodePattern]) -> Vec<Finding> {
        let lines: Vec<&str> = code.lines().collect();
        let mut findings = Vec::new();

        for rule in rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scan_rule(&lines, rule)));
            match outcome {
                Ok(mut rule_findings) => findings.append(&mut rule_findings),
                Err(_) => warn!("Rule {} panicked during scan, skipping it", rule.id),
            }
        }

        findings
    }

    fn scan_rule(&self, lines: &[&str], rule: &CodePattern) -> Vec<Finding> {
        let matcher = RuleMatcher::compile(&rule.pattern);
        let mut findings = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            for (start, end) in matcher.find_all(line) {
                let mut finding = Finding::new(rule.severity, rule.category.as_str(), &rule.description)
                    .at_line(idx + 1)
                    .with_columns(start, end)
                    .with_snippet(self.snippet(lines, idx))
                    .with_rule(&rule.id);
                if let Some(ref suggestion) = rule.suggestion {
                    finding = finding.with_suggestion(suggestion);
                }
                findings.push(finding);
            }
        }

        findings
    }

    /// The line at `idx` with `context_lines` on each side, clipped to the file.
    fn snippet(&self, lines: &[&str], idx: usize) -> String {
        let start = idx.saturating_sub(self.context_lines);
        let end = (idx + self.context_lines).min(lines.len().saturating_sub(1));
        lines[start..=end].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, Specialty};
    use chrono::Utc;

    fn rule(id: &str, pattern: &str, severity: Severity) -> CodePattern {
        CodePattern {
            id: id.to_string(),
            pattern: pattern.to_string(),
            category: Specialty::Security,
            severity,
            language: "javascript".to_string(),
            description: format!("matched {}", id),
            suggestion: Some("fix it".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_regex_is_case_insensitive() {
        let matcher = RuleMatcher::compile(r"eval\s*\(");
        assert!(matcher.is_regex());
        assert_eq!(matcher.find_all("x = EVAL (y)"), vec![(4, 10)]);
    }

    #[test]
    fn test_malformed_rules_fall_back_to_literal() {
        for text in [
            "function(",
            "for (let i = 0; i < array.length; i++)",
            "setTimeout(function",
        ] {
            let matcher = RuleMatcher::compile(text);
            assert!(!matcher.is_regex(), "{} should not compile as regex", text);

            let line = format!("  {} // here", text);
            assert_eq!(matcher.find_all(&line), vec![(2, 2 + text.len())]);
        }
    }

    #[test]
    fn test_stacked_quantifier_detection() {
        assert!(has_stacked_quantifier("i++"));
        assert!(has_stacked_quantifier("a*+"));
        assert!(has_stacked_quantifier("a+??"));
        assert!(has_stacked_quantifier(r"\d{2}*"));
        assert!(!has_stacked_quantifier("a+?"));
        assert!(!has_stacked_quantifier(r"\+\+"));
        assert!(!has_stacked_quantifier("[+*]+"));
        assert!(!has_stacked_quantifier(r"(?i)eval\s*\("));
    }

    #[test]
    fn test_scan_reports_location_and_snippet() {
        let code = "line one\nconst result = eval(data.input);\nline three\nline four\nline five";
        let findings = PatternMatcher::new(1).scan(code, &[rule("eval", r"eval\(", Severity::Critical)]);

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.category, "security");
        assert_eq!(finding.line_start, Some(2));
        assert_eq!(finding.line_end, Some(2));
        assert_eq!(finding.column_start, Some(15));
        assert_eq!(finding.rule_id.as_deref(), Some("eval"));
        assert_eq!(finding.suggestion.as_deref(), Some("fix it"));
        assert_eq!(
            finding.code_snippet.as_deref(),
            Some("line one\nconst result = eval(data.input);\nline three")
        );
    }

    #[test]
    fn test_snippet_clipped_at_file_bounds() {
        let findings = PatternMatcher::new(5).scan("eval(a)", &[rule("eval", "eval", Severity::High)]);
        assert_eq!(findings[0].code_snippet.as_deref(), Some("eval(a)"));
    }

    #[test]
    fn test_scan_preserves_rule_then_line_order() {
        let code = "b a a\na\nb";
        let rules = vec![rule("first", "a", Severity::Low), rule("second", "b", Severity::Critical)];
        let findings = PatternMatcher::default().scan(code, &rules);

        let order: Vec<(String, usize, usize)> = findings
            .iter()
            .map(|f| {
                (
                    f.rule_id.clone().unwrap_or_default(),
                    f.line_start.unwrap_or(0),
                    f.column_start.unwrap_or(0),
                )
            })
            .collect();

        assert_eq!(
            order,
            vec![
                ("first".to_string(), 1, 2),
                ("first".to_string(), 1, 4),
                ("first".to_string(), 2, 0),
                ("second".to_string(), 1, 0),
                ("second".to_string(), 3, 0),
            ]
        );
    }

    #[test]
    fn test_scan_never_panics_on_odd_rules() {
        let code = "setTimeout(function() {}, 10);\nfunction(x) {}";
        let rules = vec![
            rule("unbalanced", "function(", Severity::Low),
            rule("timer", "setTimeout(function", Severity::Low),
            rule("empty", "", Severity::Low),
            rule("optional", "z?", Severity::Low),
            rule("brackets", "[", Severity::Low),
        ];

        let findings = PatternMatcher::default().scan(code, &rules);
        let ids: Vec<_> = findings.iter().filter_map(|f| f.rule_id.as_deref()).collect();
        assert_eq!(ids, vec!["unbalanced", "unbalanced", "timer"]);
    }
}
