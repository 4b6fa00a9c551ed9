//! Markdown and JSON report generation.
//!
//! This module renders a [`Report`] covering every submission of a run.

use crate::analysis::{identify_patterns, language_distribution, most_problematic_files, sort_by_severity};
use crate::models::{
    AnalysisReport, AnalysisResult, AnalysisSummary, Finding, Report, ReportMetadata, Severity,
    SubmissionStatus,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# YoAgents Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(&report.summary, &report.files));
    output.push_str(&generate_findings_section(&report.files));
    output.push_str(&generate_recommendations_section(&report.recommendations));
    output.push_str(&generate_footer());

    output
}

fn anchor_for(name: &str) -> String {
    name.replace(['/', '\\', '.', ' ', '<', '>'], "-").to_lowercase()
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Target:** {}\n", metadata.target));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    match metadata.model_used {
        Some(ref model) => section.push_str(&format!("- **AI Review:** `{}`\n", model)),
        None => section.push_str("- **AI Review:** disabled\n"),
    }
    let agents: Vec<_> = metadata.agents.iter().map(|a| a.display_name()).collect();
    section.push_str(&format!("- **Agents:** {}\n", agents.join(", ")));
    section.push_str(&format!(
        "- **Files Analyzed:** {}\n",
        metadata.files_analyzed
    ));
    if metadata.files_failed > 0 {
        section.push_str(&format!("- **Files Failed:** {}\n", metadata.files_failed));
    }
    section.push_str(&format!(
        "- **Total Findings:** {}\n",
        metadata.total_findings
    ));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Findings by File](#findings-by-file)\n");

    for file in &report.files {
        if file.summary.total > 0 || file.status == SubmissionStatus::Failed {
            let name = file.submission.display_name();
            toc.push_str(&format!("  - [{}](#{})\n", name, anchor_for(name)));
        }
    }

    if !report.recommendations.is_empty() {
        toc.push_str("- [Recommendations](#recommendations)\n");
    }

    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(summary: &AnalysisSummary, files: &[AnalysisReport]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    section.push_str("### Finding Severity Breakdown\n\n");
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | {} Info | **Total** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
        Severity::Info.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.critical, summary.high, summary.medium, summary.low, summary.info, summary.total
    ));

    if !summary.by_agent.is_empty() {
        section.push_str("### Findings by Agent\n\n");
        section.push_str("| Agent | Findings |\n");
        section.push_str("|:---|:---:|\n");

        let mut agents: Vec<_> = summary.by_agent.iter().collect();
        agents.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (agent, count) in agents {
            section.push_str(&format!("| {} | {} |\n", agent, count));
        }
        section.push('\n');
    }

    if !summary.by_category.is_empty() {
        section.push_str("### Findings by Category\n\n");
        section.push_str("| Category | Count |\n");
        section.push_str("|:---|:---:|\n");

        let mut categories: Vec<_> = summary.by_category.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (category, count) in categories {
            section.push_str(&format!("| {} | {} |\n", category, count));
        }
        section.push('\n');
    }

    let lang_dist = language_distribution(files);
    if !lang_dist.is_empty() {
        section.push_str("### Files by Language\n\n");
        section.push_str("| Language | Files |\n");
        section.push_str("|:---|:---:|\n");

        let mut langs: Vec<_> = lang_dist.iter().collect();
        langs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (lang, count) in langs {
            section.push_str(&format!("| {} | {} |\n", lang, count));
        }
        section.push('\n');
    }

    let problematic = most_problematic_files(files, 5);
    if problematic.len() > 1 {
        section.push_str("### Most Problematic Files\n\n");
        section.push_str("| File | Findings |\n");
        section.push_str("|:---|:---:|\n");

        for (file, count) in problematic {
            section.push_str(&format!(
                "| `{}` | {} |\n",
                file.submission.display_name(),
                count
            ));
        }
        section.push('\n');
    }

    let all: Vec<Finding> = files.iter().flat_map(|f| f.findings().cloned()).collect();
    let repeated = identify_patterns(&all);
    if !repeated.is_empty() {
        section.push_str("### Recurring Findings\n\n");
        for (message, count) in repeated.iter().take(5) {
            section.push_str(&format!("- {} ({}x)\n", message, count));
        }
        section.push('\n');
    }

    section
}

/// Generate the findings section.
fn generate_findings_section(files: &[AnalysisReport]) -> String {
    let mut section = String::new();

    section.push_str("## Findings by File\n\n");

    let interesting: Vec<_> = files
        .iter()
        .filter(|f| f.summary.total > 0 || f.status == SubmissionStatus::Failed)
        .collect();

    if interesting.is_empty() {
        section.push_str("No findings in the analyzed files. Great job! 🎉\n\n");
        return section;
    }

    for file in interesting {
        section.push_str(&generate_file_section(file));
    }

    section
}

/// Generate the findings section for a single submission.
fn generate_file_section(file: &AnalysisReport) -> String {
    let mut section = String::new();

    let name = file.submission.display_name();
    section.push_str(&format!("### {} {{#{}}}\n\n", name, anchor_for(name)));

    section.push_str(&format!(
        "*Language: {} | Lines: {} | Status: {} | Findings: {}*\n\n",
        file.submission.language,
        file.submission.code.lines().count(),
        file.status,
        file.summary.total
    ));

    if file.status == SubmissionStatus::Failed {
        section.push_str(
            "> ⚠️ Analysis failed for at least one agent; results below are incomplete.\n\n",
        );
    }

    let mut results: Vec<_> = file.results.iter().collect();
    results.sort_by_key(|r| r.specialty);

    for result in results {
        if !result.findings.is_empty() {
            section.push_str(&generate_agent_block(result));
        }
    }

    section
}

/// Generate the block of findings for one agent.
fn generate_agent_block(result: &AnalysisResult) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {} ({} findings, confidence {:.0}%, {}ms)\n\n",
        result.agent_name,
        result.findings.len(),
        result.confidence * 100.0,
        result.execution_time_ms
    ));

    let mut findings = result.findings.clone();
    sort_by_severity(&mut findings);

    for finding in &findings {
        block.push_str(&generate_finding_block(finding));
    }

    block
}

/// Generate a single finding block.
fn generate_finding_block(finding: &Finding) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "- {} **{}** {}\n",
        finding.severity.emoji(),
        finding.severity.to_string().to_uppercase(),
        finding.message
    ));

    let mut details = vec![format!("Lines: {}", finding.line_range())];
    if let Some(ref rule) = finding.rule_id {
        details.push(format!("Rule: `{}`", rule));
    }
    details.push(format!("Category: {}", finding.category));
    block.push_str(&format!("  - {}\n", details.join(" | ")));

    if let Some(ref snippet) = finding.code_snippet {
        block.push_str("\n  <details>\n  <summary>View Code</summary>\n\n  ```\n");
        for line in snippet.lines() {
            block.push_str(&format!("  {}\n", line));
        }
        block.push_str("  ```\n  </details>\n\n");
    }

    if let Some(ref suggestion) = finding.suggestion {
        block.push_str(&format!("  > 💡 **Suggestion:** {}\n", suggestion));
    }

    block.push('\n');

    block
}

/// Generate the recommendations section.
fn generate_recommendations_section(recommendations: &[String]) -> String {
    if recommendations.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Recommendations\n\n");

    for (i, rec) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by YoAgents v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a report to `path`, creating parent directories as needed.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeSubmission, Specialty};
    use chrono::Utc;

    fn create_test_file(status: SubmissionStatus, findings: Vec<Finding>) -> AnalysisReport {
        let mut submission = CodeSubmission::new(
            "const x = eval(input);\n".to_string(),
            "javascript".to_string(),
            Some("src/app.js".to_string()),
        );
        submission.status = status;
        let results = vec![AnalysisResult {
            submission_id: submission.id.clone(),
            agent_id: "agent".to_string(),
            agent_name: "Security Agent".to_string(),
            specialty: Specialty::Security,
            fork_id: "fork".to_string(),
            findings,
            confidence: 0.8,
            execution_time_ms: 12,
            pattern_matches: 1,
            created_at: Utc::now(),
        }];
        AnalysisReport {
            status,
            summary: AnalysisSummary::from_results(&results),
            submission,
            results,
        }
    }

    fn create_test_report(files: Vec<AnalysisReport>) -> Report {
        let summary = crate::analysis::combine_summaries(files.iter().map(|f| &f.summary));
        Report {
            metadata: ReportMetadata {
                target: "src/app.js".to_string(),
                analysis_date: Utc::now(),
                model_used: None,
                agents: Specialty::ALL.to_vec(),
                files_analyzed: files.len(),
                files_failed: crate::analysis::failed_count(&files),
                total_findings: summary.total,
                duration_seconds: 1.5,
            },
            recommendations: crate::analysis::recommendations(&summary),
            summary,
            files,
        }
    }

    fn eval_finding() -> Finding {
        Finding::new(Severity::Critical, "security", "Use of eval()")
            .at_line(1)
            .with_rule("sec-eval")
            .with_snippet("   1 | const x = eval(input);")
            .with_suggestion("Parse the input instead")
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report(vec![create_test_file(
            SubmissionStatus::Completed,
            vec![eval_finding()],
        )]);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# YoAgents Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Findings by File"));
        assert!(markdown.contains("## Recommendations"));
        assert!(markdown.contains("### src/app.js {#src-app-js}"));
        assert!(markdown.contains("#### Security Agent (1 findings, confidence 80%, 12ms)"));
        assert!(markdown.contains("**CRITICAL** Use of eval()"));
        assert!(markdown.contains("Rule: `sec-eval`"));
        assert!(markdown.contains("Parse the input instead"));
    }

    #[test]
    fn test_clean_report() {
        let report = create_test_report(vec![create_test_file(
            SubmissionStatus::Completed,
            Vec::new(),
        )]);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("No findings in the analyzed files"));
        assert!(!markdown.contains("## Recommendations"));
        assert!(markdown.contains("**AI Review:** disabled"));
    }

    #[test]
    fn test_failed_file_is_listed() {
        let report = create_test_report(vec![create_test_file(
            SubmissionStatus::Failed,
            Vec::new(),
        )]);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("**Files Failed:** 1"));
        assert!(markdown.contains("Status: failed"));
        assert!(markdown.contains("results below are incomplete"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report(vec![create_test_file(
            SubmissionStatus::Completed,
            vec![eval_finding()],
        )]);
        let json = generate_json_report(&report).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["total_findings"], 1);
        assert_eq!(value["files"][0]["status"], "completed");
        assert_eq!(
            value["files"][0]["results"][0]["findings"][0]["severity"],
            "critical"
        );
    }

    #[test]
    fn test_write_report_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/report.md");
        write_report("# hi\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# hi\n");
    }
}
