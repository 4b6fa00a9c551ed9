//! Best-practices specialty: maintainability and idiom checks.

use super::{
    brace_counts, indent_width, is_comment_line, is_js_like, strip_literals, uses_indentation,
    HeuristicSettings, SpecialtyAnalyzer,
};
use crate::models::{Finding, Severity, Specialty};
use regex::Regex;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are a senior engineer reviewing code for maintainability. \
Look for error handling gaps, dead or duplicated code, overly long or deeply nested \
functions, unclear naming, missing input validation and deviations from the idioms of \
the language. Only report issues you can point to in the code.";

static VAR_DECLARATION: OnceLock<Regex> = OnceLock::new();
static TODO_MARKER: OnceLock<Regex> = OnceLock::new();
static BRACE_FUNCTION: OnceLock<Regex> = OnceLock::new();
static PY_FUNCTION: OnceLock<Regex> = OnceLock::new();

fn var_declaration() -> &'static Regex {
    VAR_DECLARATION.get_or_init(|| Regex::new(r"(^|[;{(]\s*)var\s+\w").expect("valid regex"))
}

fn todo_marker() -> &'static Regex {
    TODO_MARKER.get_or_init(|| {
        Regex::new(r"(//|#|/\*|^\s*\*)\s*(TODO|FIXME|HACK|XXX)\b").expect("valid regex")
    })
}

fn brace_function() -> &'static Regex {
    BRACE_FUNCTION.get_or_init(|| {
        Regex::new(r"\bfunction\b[^(]*\(|=>\s*\{|^\s*(async\s+)?(pub\s+)?fn\s+\w+|^\s*(public|private|protected|static|async|\s)*\w+\s*\([^)]*\)\s*\{")
            .expect("valid regex")
    })
}

fn py_function() -> &'static Regex {
    PY_FUNCTION.get_or_init(|| Regex::new(r"^\s*(async\s+)?def\s+\w+").expect("valid regex"))
}

const CONTROL_KEYWORDS: [&str; 6] = ["if", "for", "while", "switch", "catch", "else"];

/// Byte offset of the first `==`/`!=` that is not part of `===`/`!==`.
fn loose_equality(portion: &str) -> Option<(usize, &'static str)> {
    let bytes = portion.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i + 1] != b'=' {
            continue;
        }
        let op = match bytes[i] {
            b'=' => "==",
            b'!' => "!=",
            _ => continue,
        };
        let before = i.checked_sub(1).map(|j| bytes[j]);
        let after = bytes.get(i + 2).copied();
        if after == Some(b'=') || matches!(before, Some(b'=' | b'!' | b'<' | b'>')) {
            continue;
        }
        return Some((i, op));
    }
    None
}

fn is_function_start(portion: &str) -> bool {
    if !brace_function().is_match(portion) {
        return false;
    }
    let head = portion.trim_start();
    !CONTROL_KEYWORDS
        .iter()
        .any(|kw| head.starts_with(kw) && !head[kw.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_'))
        && !head.starts_with('}')
}

/// Function spans as (first line, last line), 1-based.
fn function_spans(code: &str, language: &str) -> Vec<(usize, usize)> {
    if uses_indentation(language) {
        return indentation_functions(code, language);
    }

    let mut spans = Vec::new();
    let mut open: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;

    for (idx, line) in code.lines().enumerate() {
        if is_comment_line(line, language) {
            continue;
        }
        let portion = strip_literals(line, language);
        let (opened, closed) = brace_counts(&portion);

        if opened > 0 && is_function_start(&portion) {
            open.push((idx + 1, depth));
        }

        depth = (depth + opened).saturating_sub(closed);

        while let Some(&(start, open_depth)) = open.last() {
            if depth > open_depth {
                break;
            }
            open.pop();
            spans.push((start, idx + 1));
        }
    }

    spans.sort_unstable();
    spans
}

fn indentation_functions(code: &str, language: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    // (start line, indent, last non-blank line)
    let mut open: Vec<(usize, usize, usize)> = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        if line.trim().is_empty() || is_comment_line(line, language) {
            continue;
        }
        let line_no = idx + 1;
        let indent = indent_width(line);

        while let Some(&(start, def_indent, last)) = open.last() {
            if indent > def_indent {
                break;
            }
            open.pop();
            spans.push((start, last));
        }

        for entry in open.iter_mut() {
            entry.2 = line_no;
        }

        if py_function().is_match(line) {
            open.push((line_no, indent, line_no));
        }
    }

    spans.extend(open.into_iter().map(|(start, _, last)| (start, last)));
    spans.sort_unstable();
    spans
}

/// Best-practices agent behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestPracticesAnalyzer;

impl BestPracticesAnalyzer {
    fn line_checks(code: &str, language: &str, findings: &mut Vec<Finding>) {
        let category = Specialty::BestPractices.as_str();

        for (idx, line) in code.lines().enumerate() {
            let line_no = idx + 1;

            if todo_marker().is_match(line) {
                findings.push(
                    Finding::new(Severity::Info, category, "Unresolved TODO/FIXME marker")
                        .at_line(line_no)
                        .with_snippet(line.trim())
                        .with_suggestion("Track the follow-up in an issue or resolve it"),
                );
            }

            if !is_js_like(language) || is_comment_line(line, language) {
                continue;
            }
            let portion = strip_literals(line, language);

            if let Some((col, op)) = loose_equality(&portion) {
                let strict = if op == "==" { "===" } else { "!==" };
                findings.push(
                    Finding::new(
                        Severity::Low,
                        category,
                        format!("Loose equality operator '{}' used", op),
                    )
                    .at_line(line_no)
                    .with_columns(col, col + op.len())
                    .with_snippet(line.trim())
                    .with_suggestion(format!("Use '{}' to avoid type coercion", strict)),
                );
            }

            if var_declaration().is_match(&portion) {
                findings.push(
                    Finding::new(Severity::Low, category, "'var' declaration is function-scoped")
                        .at_line(line_no)
                        .with_snippet(line.trim())
                        .with_suggestion("Use 'let' or 'const'"),
                );
            }
        }
    }

    fn long_functions(
        code: &str,
        language: &str,
        settings: &HeuristicSettings,
        findings: &mut Vec<Finding>,
    ) {
        for (start, end) in function_spans(code, language) {
            let length = end - start + 1;
            if length > settings.max_function_lines {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        Specialty::BestPractices.as_str(),
                        format!(
                            "Function is {} lines long (limit {})",
                            length, settings.max_function_lines
                        ),
                    )
                    .spanning(start, end)
                    .with_suggestion("Split the function into smaller helpers"),
                );
            }
        }
    }

    fn deep_nesting(
        code: &str,
        language: &str,
        settings: &HeuristicSettings,
        findings: &mut Vec<Finding>,
    ) {
        let limit = settings.max_nesting_depth;
        let python = uses_indentation(language);
        let mut depth = 0usize;
        let mut reported = false;

        for (idx, line) in code.lines().enumerate() {
            if line.trim().is_empty() || is_comment_line(line, language) {
                continue;
            }

            let level = if python {
                indent_width(line) / 4
            } else {
                let portion = strip_literals(line, language);
                let (opened, closed) = brace_counts(&portion);
                // A leading `}` belongs to the enclosing block.
                let level = if portion.trim_start().starts_with('}') {
                    depth.saturating_sub(1)
                } else {
                    depth
                };
                depth = (depth + opened).saturating_sub(closed);
                level
            };

            if level > limit && !reported {
                reported = true;
                findings.push(
                    Finding::new(
                        Severity::Low,
                        Specialty::BestPractices.as_str(),
                        format!("Code nested {} levels deep (limit {})", level, limit),
                    )
                    .at_line(idx + 1)
                    .with_snippet(line.trim())
                    .with_suggestion("Use early returns or extract the inner block"),
                );
            } else if level <= limit {
                reported = false;
            }
        }
    }
}

impl SpecialtyAnalyzer for BestPracticesAnalyzer {
    fn specialty(&self) -> Specialty {
        Specialty::BestPractices
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn heuristics(&self, code: &str, language: &str, settings: &HeuristicSettings) -> Vec<Finding> {
        let mut findings = Vec::new();

        Self::line_checks(code, language, &mut findings);
        Self::long_functions(code, language, settings, &mut findings);
        Self::deep_nesting(code, language, settings, &mut findings);

        findings.sort_by_key(|f| f.line_start);
        findings
    }
}
