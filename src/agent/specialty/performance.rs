//! Performance specialty: loop structure, blocking I/O and repeated work.

use super::{
    brace_counts, indent_width, is_comment_line, is_js_like, strip_literals, uses_indentation,
    HeuristicSettings, SpecialtyAnalyzer,
};
use crate::models::{Finding, Severity, Specialty};
use regex::Regex;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are a performance engineer reviewing source code. \
Look for algorithmic inefficiency (nested iteration, repeated lookups), blocking I/O \
on hot paths, unnecessary allocation or copying, N+1 queries, memory leaks and \
expensive work repeated inside loops. Only report issues you can point to in the code.";

static BRACE_LOOP: OnceLock<Regex> = OnceLock::new();
static PY_LOOP: OnceLock<Regex> = OnceLock::new();
static LENGTH_IN_CONDITION: OnceLock<Regex> = OnceLock::new();
static SYNC_FS: OnceLock<Regex> = OnceLock::new();
static STRING_APPEND: OnceLock<Regex> = OnceLock::new();
static DOM_QUERY: OnceLock<Regex> = OnceLock::new();

fn brace_loop() -> &'static Regex {
    BRACE_LOOP.get_or_init(|| {
        Regex::new(r"\b(for|while)\s*\(|\bdo\s*\{|\.forEach\s*\(").expect("valid regex")
    })
}

fn py_loop() -> &'static Regex {
    PY_LOOP.get_or_init(|| {
        Regex::new(r"^\s*(async\s+)?(for|while)\b.*:\s*$").expect("valid regex")
    })
}

fn length_in_condition() -> &'static Regex {
    LENGTH_IN_CONDITION.get_or_init(|| {
        Regex::new(r"\bfor\s*\([^;]*;[^;]*\.length\b[^;]*;").expect("valid regex")
    })
}

fn sync_fs() -> &'static Regex {
    SYNC_FS.get_or_init(|| {
        Regex::new(r"\b(readFileSync|writeFileSync|appendFileSync|existsSync|readdirSync|statSync)\s*\(")
            .expect("valid regex")
    })
}

fn string_append() -> &'static Regex {
    STRING_APPEND.get_or_init(|| {
        Regex::new(r#"\w+\s*\+=\s*(["'`]|f["']|str\()"#).expect("valid regex")
    })
}

fn dom_query() -> &'static Regex {
    DOM_QUERY.get_or_init(|| {
        Regex::new(r"document\.(querySelector(All)?|getElementById|getElementsBy\w+)\s*\(")
            .expect("valid regex")
    })
}

/// Number of enclosing loop bodies for each line, and whether the line
/// opens a loop itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LoopContext {
    enclosing: usize,
    header: bool,
}

#[derive(Debug)]
struct OpenLoop {
    open_depth: usize,
    line: usize,
    entered: bool,
}

fn loop_contexts(code: &str, language: &str) -> Vec<LoopContext> {
    if uses_indentation(language) {
        indentation_loops(code, language)
    } else {
        brace_loops(code, language)
    }
}

fn brace_loops(code: &str, language: &str) -> Vec<LoopContext> {
    let mut contexts = Vec::new();
    let mut depth = 0usize;
    let mut open: Vec<OpenLoop> = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let portion = if is_comment_line(line, language) {
            String::new()
        } else {
            strip_literals(line, language)
        };
        let (opened, closed) = brace_counts(&portion);
        let trimmed = portion.trim();

        let header = brace_loop().is_match(&portion) && !trimmed.starts_with('}');
        let one_liner = opened > 0 && opened == closed;
        let braceless = opened == 0 && trimmed.ends_with(';');

        contexts.push(LoopContext {
            enclosing: open.iter().filter(|l| l.entered).count(),
            header,
        });

        if header && !one_liner && !braceless {
            open.push(OpenLoop {
                open_depth: depth,
                line: idx,
                entered: false,
            });
        }

        depth = (depth + opened).saturating_sub(closed);

        for l in open.iter_mut() {
            if !l.entered && depth > l.open_depth {
                l.entered = true;
            }
        }
        // A header whose body never opened is dropped after one line.
        open.retain(|l| {
            if l.entered {
                depth > l.open_depth
            } else {
                idx <= l.line + 1
            }
        });
    }

    contexts
}

fn indentation_loops(code: &str, language: &str) -> Vec<LoopContext> {
    let mut contexts = Vec::new();
    let mut open: Vec<usize> = Vec::new();

    for line in code.lines() {
        if line.trim().is_empty() || is_comment_line(line, language) {
            contexts.push(LoopContext {
                enclosing: open.len(),
                header: false,
            });
            continue;
        }

        let indent = indent_width(line);
        open.retain(|header_indent| indent > *header_indent);

        let portion = strip_literals(line, language);
        let header = py_loop().is_match(&portion);
        contexts.push(LoopContext {
            enclosing: open.len(),
            header,
        });

        if header {
            open.push(indent);
        }
    }

    contexts
}

/// Performance agent behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceAnalyzer;

impl SpecialtyAnalyzer for PerformanceAnalyzer {
    fn specialty(&self) -> Specialty {
        Specialty::Performance
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn heuristics(&self, code: &str, language: &str, _settings: &HeuristicSettings) -> Vec<Finding> {
        let category = Specialty::Performance.as_str();
        let contexts = loop_contexts(code, language);
        let mut findings = Vec::new();

        for (idx, (line, ctx)) in code.lines().zip(contexts.iter()).enumerate() {
            if is_comment_line(line, language) {
                continue;
            }
            let line_no = idx + 1;
            let in_loop = ctx.enclosing > 0;

            if ctx.header && in_loop {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        category,
                        format!("Loop nested {} levels deep", ctx.enclosing + 1),
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Index the inner collection with a Map or Set to avoid quadratic work"),
                );
            }

            if is_js_like(language) && length_in_condition().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Low,
                        category,
                        "Collection length re-read on every loop iteration",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Cache the length before the loop or use for...of"),
                );
            }

            if sync_fs().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        category,
                        "Synchronous file system call blocks the event loop",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Use the promise-based fs API"),
                );
            }

            if in_loop && string_append().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Low,
                        category,
                        "String built by repeated concatenation inside a loop",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Collect parts in an array and join once"),
                );
            }

            if in_loop && dom_query().is_match(line) {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        category,
                        "DOM query repeated inside a loop",
                    )
                    .at_line(line_no)
                    .with_snippet(line.trim())
                    .with_suggestion("Query the element once before the loop"),
                );
            }
        }

        findings
    }
}
