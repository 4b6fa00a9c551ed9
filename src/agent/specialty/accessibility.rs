//! Accessibility specialty: markup checks over HTML and JSX tags.

use super::{opening_tags, HeuristicSettings, SpecialtyAnalyzer, Tag};
use crate::models::{Finding, Severity, Specialty};
use regex::Regex;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are an accessibility specialist reviewing UI code against WCAG 2.1. \
Look for missing text alternatives, unlabeled form controls, interactive behaviour on \
non-interactive elements, keyboard traps, missing focus indicators, insufficient color \
contrast and misuse of ARIA. Only report issues you can point to in the code.";

const CLICKABLE_STATIC: [&str; 6] = ["div", "span", "li", "p", "td", "img"];

static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
static EMPTY_BUTTON: OnceLock<Regex> = OnceLock::new();

fn attribute() -> &'static Regex {
    ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"(?i)\s([\w:-]+)(\s*=\s*("[^"]*"|'[^']*'|\{[^}]*\}|[^\s>]+))?"#)
            .expect("valid regex")
    })
}

fn empty_button() -> &'static Regex {
    EMPTY_BUTTON.get_or_init(|| Regex::new(r"(?is)<button\b([^>]*)>\s*</button>").expect("valid regex"))
}

/// Attribute value of `name` on a tag: `Some("")` for a bare attribute.
fn attr<'a>(tag: &Tag<'a>, name: &str) -> Option<&'a str> {
    attribute().captures_iter(tag.text).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps
            .get(3)
            .map_or("", |v| v.as_str())
            .trim_matches(|c| c == '"' || c == '\'' || c == '{' || c == '}');
        Some(value)
    })
}

fn has_attr(tag: &Tag<'_>, name: &str) -> bool {
    attr(tag, name).is_some()
}

fn has_accessible_name(tag: &Tag<'_>) -> bool {
    has_attr(tag, "aria-label") || has_attr(tag, "aria-labelledby") || has_attr(tag, "title")
}

/// Whether some `<label>` in the document points at `id`.
fn label_targets(code: &str, id: &str) -> bool {
    opening_tags(code, "label").iter().any(|label| {
        attr(label, "for")
            .or_else(|| attr(label, "htmlFor"))
            .is_some_and(|target| target == id)
    })
}

/// Whether the control sits inside an open `<label>` on the same line.
fn wrapped_in_label(code: &str, tag: &Tag<'_>) -> bool {
    code.lines()
        .nth(tag.line - 1)
        .is_some_and(|line| {
            let lower = line.to_ascii_lowercase();
            match (lower.find("<label"), lower.find("<input")) {
                (Some(label), Some(input)) => label < input,
                _ => false,
            }
        })
}

/// Accessibility agent behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessibilityAnalyzer;

impl AccessibilityAnalyzer {
    fn images(code: &str, findings: &mut Vec<Finding>) {
        for tag in opening_tags(code, "img") {
            if !has_attr(&tag, "alt") {
                findings.push(
                    Finding::new(
                        Severity::High,
                        Specialty::Accessibility.as_str(),
                        "Image is missing alt text",
                    )
                    .at_line(tag.line)
                    .with_snippet(tag.text)
                    .with_suggestion("Add a descriptive alt attribute, or alt=\"\" for decorative images"),
                );
            }
        }
    }

    fn click_handlers(code: &str, findings: &mut Vec<Finding>) {
        for element in CLICKABLE_STATIC {
            for tag in opening_tags(code, element) {
                let clickable = has_attr(&tag, "onclick");
                if clickable && !has_attr(&tag, "role") {
                    let keyboard = has_attr(&tag, "onkeydown")
                        || has_attr(&tag, "onkeyup")
                        || has_attr(&tag, "onkeypress");
                    let message = if keyboard {
                        format!("Click handler on <{}> without a role", element)
                    } else {
                        format!(
                            "Click handler on <{}> without a role or keyboard handler",
                            element
                        )
                    };
                    findings.push(
                        Finding::new(Severity::Medium, Specialty::Accessibility.as_str(), message)
                            .at_line(tag.line)
                            .with_snippet(tag.text)
                            .with_suggestion("Use a <button>, or add role, tabIndex and a key handler"),
                    );
                }
            }
        }
    }

    fn form_inputs(code: &str, findings: &mut Vec<Finding>) {
        for tag in opening_tags(code, "input") {
            let kind = attr(&tag, "type").unwrap_or("text").to_ascii_lowercase();
            if matches!(kind.as_str(), "hidden" | "submit" | "button" | "reset" | "image") {
                continue;
            }
            if has_accessible_name(&tag) || wrapped_in_label(code, &tag) {
                continue;
            }
            if attr(&tag, "id").is_some_and(|id| !id.is_empty() && label_targets(code, id)) {
                continue;
            }

            findings.push(
                Finding::new(
                    Severity::Medium,
                    Specialty::Accessibility.as_str(),
                    "Form input has no associated label",
                )
                .at_line(tag.line)
                .with_snippet(tag.text)
                .with_suggestion("Add a <label for=...> or an aria-label"),
            );
        }
    }

    fn anchors(code: &str, findings: &mut Vec<Finding>) {
        for tag in opening_tags(code, "a") {
            let href = attr(&tag, "href");
            let broken = match href {
                None => true,
                Some(target) => target.is_empty() || target == "#" || target.starts_with("javascript:"),
            };
            if broken && !has_attr(&tag, "role") {
                findings.push(
                    Finding::new(
                        Severity::Low,
                        Specialty::Accessibility.as_str(),
                        "Anchor without a real href is not keyboard accessible",
                    )
                    .at_line(tag.line)
                    .with_snippet(tag.text)
                    .with_suggestion("Give the link a destination or use a <button>"),
                );
            }
        }
    }

    fn buttons(code: &str, findings: &mut Vec<Finding>) {
        for caps in empty_button().captures_iter(code) {
            let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let tag = Tag {
                line: code[..whole.start()].matches('\n').count() + 1,
                text: attrs.as_str(),
            };
            if has_accessible_name(&tag) {
                continue;
            }
            findings.push(
                Finding::new(
                    Severity::Medium,
                    Specialty::Accessibility.as_str(),
                    "Button has no accessible name",
                )
                .at_line(tag.line)
                .with_snippet(whole.as_str())
                .with_suggestion("Add visible text or an aria-label"),
            );
        }
    }
}

impl SpecialtyAnalyzer for AccessibilityAnalyzer {
    fn specialty(&self) -> Specialty {
        Specialty::Accessibility
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn heuristics(&self, code: &str, _language: &str, _settings: &HeuristicSettings) -> Vec<Finding> {
        let mut findings = Vec::new();

        Self::images(code, &mut findings);
        Self::click_handlers(code, &mut findings);
        Self::form_inputs(code, &mut findings);
        Self::anchors(code, &mut findings);
        Self::buttons(code, &mut findings);

        findings.sort_by_key(|f| f.line_start);
        findings
    }
}
