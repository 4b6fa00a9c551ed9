//! Specialty analyzers: the per-agent behaviour plugged into a pipeline.
//!
//! Each specialty contributes a system prompt for the AI stage and a set of
//! cheap line-based heuristics run after rule matching.

mod accessibility;
mod best_practices;
mod performance;
mod security;

use crate::models::{Finding, Specialty};

pub use accessibility::AccessibilityAnalyzer;
pub use best_practices::BestPracticesAnalyzer;
pub use performance::PerformanceAnalyzer;
pub use security::SecurityAnalyzer;

/// Thresholds for the structural heuristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicSettings {
    pub max_function_lines: usize,
    pub max_nesting_depth: usize,
}

impl Default for HeuristicSettings {
    fn default() -> Self {
        Self {
            max_function_lines: 50,
            max_nesting_depth: 4,
        }
    }
}

/// Specialty-specific behaviour of an agent pipeline.
pub trait SpecialtyAnalyzer: Send + Sync {
    fn specialty(&self) -> Specialty;

    /// System prompt for the AI-assisted stage.
    fn system_prompt(&self) -> &'static str;

    /// Line-based checks that need no rules or model.
    fn heuristics(&self, code: &str, language: &str, settings: &HeuristicSettings)
        -> Vec<Finding>;
}

/// The analyzer for `specialty`.
pub fn analyzer_for(specialty: Specialty) -> Box<dyn SpecialtyAnalyzer> {
    match specialty {
        Specialty::Security => Box::new(SecurityAnalyzer),
        Specialty::Performance => Box::new(PerformanceAnalyzer),
        Specialty::Accessibility => Box::new(AccessibilityAnalyzer),
        Specialty::BestPractices => Box::new(BestPracticesAnalyzer),
    }
}

pub(crate) fn is_js_like(language: &str) -> bool {
    matches!(language, "javascript" | "typescript")
}

pub(crate) fn uses_indentation(language: &str) -> bool {
    language == "python"
}

/// Code portion of a line: string literal contents blanked and any trailing
/// comment removed. Quote characters are kept so offsets stay meaningful.
pub(crate) fn strip_literals(line: &str, language: &str) -> String {
    let hash_comments = uses_indentation(language) || matches!(language, "ruby" | "shell");
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    out.push(' ');
                    if chars.next().is_some() {
                        out.push(' ');
                    }
                } else if c == q {
                    quote = None;
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
            None => match c {
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '/' if !hash_comments && chars.peek() == Some(&'/') => break,
                '#' if hash_comments => break,
                _ => out.push(c),
            },
        }
    }

    out
}

/// Whether the whole line is a comment.
pub(crate) fn is_comment_line(line: &str, language: &str) -> bool {
    let trimmed = line.trim_start();
    if uses_indentation(language) {
        return trimmed.starts_with('#');
    }
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

/// Net brace count of the code portion of a line, as (opened, closed).
pub(crate) fn brace_counts(code_portion: &str) -> (usize, usize) {
    code_portion.chars().fold((0, 0), |(open, close), c| match c {
        '{' => (open + 1, close),
        '}' => (open, close + 1),
        _ => (open, close),
    })
}

/// Leading indentation width, tabs counted as four columns.
pub(crate) fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// An opening tag found in markup: 1-based line and the text up to its `>`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag<'a> {
    pub line: usize,
    pub text: &'a str,
}

/// Every `<name ...>` opening tag in `code`, spanning lines if needed.
///
/// JSX expressions inside braces may contain `>` and are skipped over.
pub(crate) fn opening_tags<'a>(code: &'a str, name: &str) -> Vec<Tag<'a>> {
    let lower = code.to_ascii_lowercase();
    let needle = format!("<{}", name.to_ascii_lowercase());
    let mut tags = Vec::new();
    let mut from = 0;

    while let Some(found) = lower[from..].find(&needle) {
        let start = from + found;
        let name_end = start + needle.len();
        from = name_end;

        let boundary = code[name_end..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '-'));
        if !boundary {
            continue;
        }

        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut end = code.len();

        for (offset, c) in code[name_end..].char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '"' | '\'' if depth == 0 => quote = Some(c),
                    '{' => depth += 1,
                    '}' => depth = depth.saturating_sub(1),
                    '>' if depth == 0 => {
                        end = name_end + offset + 1;
                        break;
                    }
                    _ => {}
                },
            }
        }

        tags.push(Tag {
            line: code[..start].matches('\n').count() + 1,
            text: &code[start..end],
        });
    }

    tags
}
