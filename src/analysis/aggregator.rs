//! Finding aggregation and statistics.
//!
//! This module combines the per-submission reports of a run into
//! cross-file views: merged summaries, groupings, and the severity
//! checks behind `--fail-on` and `--min-severity`.

use crate::models::{AnalysisReport, AnalysisSummary, Finding, Severity, SubmissionStatus};
use std::collections::HashMap;

/// All findings of every report, paired with the file they came from.
pub fn aggregate_findings(reports: &[AnalysisReport]) -> Vec<(&str, &Finding)> {
    reports
        .iter()
        .flat_map(|r| {
            let name = r.submission.display_name();
            r.findings().map(move |f| (name, f))
        })
        .collect()
}

/// Sort findings by severity (critical first), then by line.
pub fn sort_by_severity(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.line_start.cmp(&b.line_start))
    });
}

/// Group findings by severity.
pub fn group_by_severity(findings: &[Finding]) -> HashMap<Severity, Vec<Finding>> {
    let mut grouped: HashMap<Severity, Vec<Finding>> = HashMap::new();

    for finding in findings {
        grouped
            .entry(finding.severity)
            .or_default()
            .push(finding.clone());
    }

    grouped
}

/// Group findings by category.
pub fn group_by_category(findings: &[Finding]) -> HashMap<String, Vec<Finding>> {
    let mut grouped: HashMap<String, Vec<Finding>> = HashMap::new();

    for finding in findings {
        grouped
            .entry(finding.category.clone())
            .or_default()
            .push(finding.clone());
    }

    grouped
}

/// Get the top N findings by severity.
pub fn top_findings(findings: &[Finding], n: usize) -> Vec<Finding> {
    let mut sorted = findings.to_vec();
    sort_by_severity(&mut sorted);
    sorted.truncate(n);
    sorted
}

/// Merge per-submission summaries into one.
pub fn combine_summaries<'a>(
    summaries: impl IntoIterator<Item = &'a AnalysisSummary>,
) -> AnalysisSummary {
    let mut combined = AnalysisSummary::default();

    for summary in summaries {
        combined.total += summary.total;
        combined.critical += summary.critical;
        combined.high += summary.high;
        combined.medium += summary.medium;
        combined.low += summary.low;
        combined.info += summary.info;

        for (category, count) in &summary.by_category {
            *combined.by_category.entry(category.clone()).or_default() += count;
        }
        for (agent, count) in &summary.by_agent {
            *combined.by_agent.entry(agent.clone()).or_default() += count;
        }
    }

    combined
}

/// Drop findings below `min` and recompute the report's summary.
pub fn filter_min_severity(report: &mut AnalysisReport, min: Severity) {
    for result in &mut report.results {
        result.findings.retain(|f| f.severity >= min);
    }
    report.summary = AnalysisSummary::from_results(&report.results);
}

/// Highest severity found in any report.
pub fn highest_severity(reports: &[AnalysisReport]) -> Option<Severity> {
    reports
        .iter()
        .flat_map(|r| r.findings())
        .map(|f| f.severity)
        .max()
}

/// Whether any finding is at or above `threshold`.
pub fn any_at_or_above(reports: &[AnalysisReport], threshold: Severity) -> bool {
    highest_severity(reports).is_some_and(|s| s >= threshold)
}

/// Number of reports whose submission ended `failed`.
pub fn failed_count(reports: &[AnalysisReport]) -> usize {
    reports
        .iter()
        .filter(|r| r.status == SubmissionStatus::Failed)
        .count()
}

/// Compute language distribution across submissions.
pub fn language_distribution(reports: &[AnalysisReport]) -> HashMap<String, usize> {
    let mut dist: HashMap<String, usize> = HashMap::new();

    for report in reports {
        *dist.entry(report.submission.language.clone()).or_default() += 1;
    }

    dist
}

/// Identify the most problematic files (by finding count).
pub fn most_problematic_files(reports: &[AnalysisReport], n: usize) -> Vec<(&AnalysisReport, usize)> {
    let mut file_findings: Vec<_> = reports
        .iter()
        .map(|r| (r, r.summary.total))
        .filter(|(_, count)| *count > 0)
        .collect();

    file_findings.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    file_findings.truncate(n);

    file_findings
}

/// Finding messages reported more than once, most frequent first.
pub fn identify_patterns(findings: &[Finding]) -> Vec<(String, usize)> {
    let mut message_counts: HashMap<String, usize> = HashMap::new();

    for finding in findings {
        *message_counts.entry(finding.message.to_lowercase()).or_default() += 1;
    }

    let mut patterns: Vec<_> = message_counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect();

    patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    patterns
}

/// Recommendations derived from a summary, most urgent first.
pub fn recommendations(summary: &AnalysisSummary) -> Vec<String> {
    let mut recs = Vec::new();

    if summary.critical > 0 {
        recs.push(format!(
            "Fix the {} critical finding(s) before anything else; they are likely exploitable or crash-prone.",
            summary.critical
        ));
    }
    if summary.high > 0 {
        recs.push(format!(
            "Schedule the {} high severity finding(s) for the next change to this code.",
            summary.high
        ));
    }

    let category_hint = |category: &str| match category {
        "security" => Some("Review input handling and secrets: route user data through validation and keep credentials out of source."),
        "performance" => Some("Profile the flagged loops and synchronous I/O; hoist repeated work out of hot paths."),
        "accessibility" => Some("Give every interactive element an accessible name and keyboard support."),
        "best-practices" => Some("Split long functions and flatten deep nesting to keep the code reviewable."),
        _ => None,
    };

    let mut categories: Vec<_> = summary.by_category.iter().collect();
    categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (category, _) in categories {
        if let Some(hint) = category_hint(category) {
            recs.push(hint.to_string());
        }
    }

    if recs.is_empty() && summary.total > 0 {
        recs.push("Only minor findings remain; address them opportunistically.".to_string());
    }

    recs
}

/// Generate a text summary of finding statistics.
pub fn generate_summary_text(summary: &AnalysisSummary) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Total Findings: {}", summary.total));
    for severity in Severity::ALL {
        lines.push(format!(
            "- {} {}: {}",
            severity.emoji(),
            severity,
            summary.count(severity)
        ));
    }

    if !summary.by_category.is_empty() {
        lines.push(String::new());
        lines.push("By Category:".to_string());

        let mut categories: Vec<_> = summary.by_category.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (category, count) in categories {
            lines.push(format!("- {}: {}", category, count));
        }
    }

    lines.join("\n")
}
