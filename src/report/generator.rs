//! Markdown report generation.
//!
//! This module renders the final review report as Markdown or JSON.

use crate::config::ReportConfig;
use crate::models::{
    Finding, FindingSummary, Fix, ReviewReport, Severity, VerificationStatus,
};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &ReviewReport, options: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# CodeCouncil Review\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(report));

    // Overview
    output.push_str(&generate_overview_section(&report.overview));

    // Summary section
    output.push_str(&generate_summary_section(&report.summary));

    // Findings
    let min_severity = Severity::from(options.min_severity.as_str());
    output.push_str(&generate_findings_section(
        &report.findings,
        min_severity,
        options.include_snippets,
    ));

    // Proposed fixes
    output.push_str(&generate_fixes_section(&report.fixes, &report.findings));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &ReviewReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Review ID:** `{}`\n", report.review_id));
    section.push_str(&format!("- **Status:** {}\n", report.status));
    section.push_str(&format!(
        "- **Date:** {}\n",
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Steps Completed:** {}\n",
        report.metrics.steps_completed
    ));
    if report.metrics.steps_failed > 0 {
        section.push_str(&format!(
            "- **Steps Failed:** {}\n",
            report.metrics.steps_failed
        ));
    }
    section.push_str(&format!("- **Total Findings:** {}\n", report.summary.total));
    if report.metrics.duplicates_removed > 0 {
        section.push_str(&format!(
            "- **Duplicates Removed:** {}\n",
            report.metrics.duplicates_removed
        ));
    }
    section.push_str(&format!(
        "- **Review Duration:** {:.1}s\n",
        report.metrics.duration_ms as f64 / 1000.0
    ));
    section.push('\n');

    section
}

/// Generate the overview section.
fn generate_overview_section(overview: &str) -> String {
    if overview.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Overview\n\n");
    section.push_str(overview);
    section.push_str("\n\n");

    section
}

/// Generate the summary section.
fn generate_summary_section(summary: &FindingSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    // Severity breakdown
    section.push_str("### Findings by Severity\n\n");
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

    // Category breakdown
    if !summary.by_category.is_empty() {
        section.push_str("### Findings by Category\n\n");
        section.push_str("| Category | Count |\n");
        section.push_str("|:---|:---:|\n");

        let mut categories: Vec<_> = summary.by_category.iter().collect();
        categories.sort_by_key(|(_, count)| std::cmp::Reverse(**count));

        for (category, count) in categories {
            section.push_str(&format!("| {} | {} |\n", category, count));
        }
        section.push('\n');
    }

    section
}

/// Generate the findings section.
fn generate_findings_section(
    findings: &[Finding],
    min_severity: Severity,
    include_snippets: bool,
) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");

    let visible: Vec<_> = findings
        .iter()
        .filter(|f| f.severity >= min_severity)
        .collect();

    if visible.is_empty() {
        section.push_str("No issues were found. Great job! 🎉\n\n");
        return section;
    }

    for finding in visible {
        section.push_str(&generate_finding_block(finding, include_snippets));
    }

    section
}

/// Generate a single finding block.
fn generate_finding_block(finding: &Finding, include_snippets: bool) -> String {
    let mut block = String::new();

    // Finding header with severity badge
    let severity_badge = match finding.severity {
        Severity::Critical => "🔴 **CRITICAL**",
        Severity::High => "🟠 **HIGH**",
        Severity::Medium => "🟡 **MEDIUM**",
        Severity::Low => "🟢 **LOW**",
        Severity::Info => "🔵 **INFO**",
    };

    block.push_str(&format!(
        "#### {} {} - {}\n\n",
        severity_badge, finding.category, finding.title
    ));

    // Line reference and provenance
    block.push_str(&format!("**Lines:** {}\n\n", finding.location.line_range()));
    block.push_str(&format!(
        "*Found by: {} (confidence {:.0}%)*\n\n",
        finding.step_id,
        finding.confidence * 100.0
    ));

    // Description
    if !finding.description.is_empty() {
        block.push_str(&format!("**Description:** {}\n\n", finding.description));
    }

    // Code snippet
    if include_snippets {
        if let Some(ref snippet) = finding.code_snippet {
            block.push_str("<details>\n<summary>View Code</summary>\n\n```\n");
            block.push_str(snippet);
            block.push_str("\n```\n</details>\n\n");
        }
    }

    // Suggestion
    if let Some(ref suggestion) = finding.suggestion {
        if !suggestion.is_empty() {
            block.push_str(&format!("> 💡 **Suggestion:** {}\n\n", suggestion));
        }
    }

    block.push_str("---\n\n");

    block
}

/// Generate the proposed fixes section.
fn generate_fixes_section(fixes: &[Fix], findings: &[Finding]) -> String {
    if fixes.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Proposed Fixes\n\n");

    for fix in fixes {
        let badge = match fix.verification_status {
            VerificationStatus::Verified => "✅ Verified",
            VerificationStatus::Unverified => "⚠️ Unverified",
            VerificationStatus::Pending => "⏳ Pending",
        };
        let title = findings
            .iter()
            .find(|f| f.finding_id == fix.finding_id)
            .map(|f| f.title.as_str())
            .unwrap_or("(unknown finding)");

        section.push_str(&format!("#### {} - {}\n\n", badge, title));

        if !fix.explanation.is_empty() {
            section.push_str(&format!("{}\n\n", fix.explanation));
        }

        if let Some(ref original) = fix.original_code {
            section.push_str("**Before:**\n\n```\n");
            section.push_str(original);
            section.push_str("\n```\n\n");
        }
        section.push_str("**After:**\n\n```\n");
        section.push_str(&fix.proposed_code);
        section.push_str("\n```\n\n");

        section.push_str("---\n\n");
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("*Report generated by CodeCouncil*\n");

    footer
}

/// Write the Markdown report to a file.
#[allow(dead_code)] // Alternative to rendering and writing separately
pub fn write_report(report: &ReviewReport, options: &ReportConfig, path: &Path) -> Result<()> {
    let content = generate_markdown_report(report, options);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Generate a JSON report.
///
/// The severity threshold applies here too: filtered findings drop out
/// along with their fixes, and the summary is recomputed over the rest.
pub fn generate_json_report(report: &ReviewReport, options: &ReportConfig) -> Result<String> {
    let min_severity = Severity::from(options.min_severity.as_str());
    let mut rendered = report.clone();
    rendered.findings.retain(|f| f.severity >= min_severity);
    let kept: Vec<&str> = rendered
        .findings
        .iter()
        .map(|f| f.finding_id.as_str())
        .collect();
    rendered
        .fixes
        .retain(|fix| kept.contains(&fix.finding_id.as_str()));
    rendered.summary = FindingSummary::from_findings(&rendered.findings);
    serde_json::to_string_pretty(&rendered).map_err(Into::into)
}

/// Write a JSON report to a file.
#[allow(dead_code)] // Convenience wrapper
pub fn write_json_report(report: &ReviewReport, options: &ReportConfig, path: &Path) -> Result<()> {
    let content = generate_json_report(report, options)?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        short_id, Category, Location, ReportStatus, ReviewMetrics,
    };
    use chrono::Utc;

    fn create_test_report() -> ReviewReport {
        let critical = Finding {
            finding_id: short_id(),
            step_id: "security".to_string(),
            category: Category::Security,
            issue_type: "sql_injection".to_string(),
            severity: Severity::Critical,
            title: "SQL injection in login".to_string(),
            description: "User input is interpolated into the query".to_string(),
            location: Location::new("auth.py", 12, 14),
            code_snippet: Some("query = f\"SELECT * FROM users WHERE id={uid}\"".to_string()),
            suggestion: Some("Use parameterized queries".to_string()),
            confidence: 0.92,
        };
        let low = Finding {
            finding_id: short_id(),
            step_id: "bug".to_string(),
            category: Category::Quality,
            issue_type: "naming".to_string(),
            severity: Severity::Low,
            title: "Unclear variable name".to_string(),
            description: "Single-letter name in public API".to_string(),
            location: Location::line("auth.py", 3),
            code_snippet: None,
            suggestion: None,
            confidence: 0.6,
        };
        let fix = Fix {
            fix_id: short_id(),
            finding_id: critical.finding_id.clone(),
            original_code: Some("query = f\"...\"".to_string()),
            proposed_code: "cursor.execute(query, (uid,))".to_string(),
            explanation: "Bind the user id instead of formatting it in".to_string(),
            confidence: 0.85,
            verification_status: VerificationStatus::Verified,
        };

        let findings = vec![critical, low];
        let summary = FindingSummary::from_findings(&findings);
        ReviewReport {
            review_id: "abcd1234".to_string(),
            status: ReportStatus::Completed,
            overview: "Reviewed auth.py: 2 findings".to_string(),
            findings,
            fixes: vec![fix],
            summary,
            metrics: ReviewMetrics {
                steps_completed: 2,
                steps_failed: 0,
                duplicates_removed: 1,
                fixes_rejected: 0,
                duration_ms: 4231,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_markdown_report_sections() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportConfig::default());

        assert!(markdown.contains("# CodeCouncil Review"));
        assert!(markdown.contains("- **Review ID:** `abcd1234`"));
        assert!(markdown.contains("- **Status:** completed"));
        assert!(markdown.contains("- **Duplicates Removed:** 1"));
        assert!(markdown.contains("- **Review Duration:** 4.2s"));
        assert!(markdown.contains("## Findings"));
        assert!(markdown.contains("🔴 **CRITICAL** Security - SQL injection in login"));
        assert!(markdown.contains("**Lines:** 12-14"));
        assert!(markdown.contains("> 💡 **Suggestion:** Use parameterized queries"));
        assert!(markdown.contains("## Proposed Fixes"));
        assert!(markdown.contains("✅ Verified - SQL injection in login"));
        assert!(markdown.contains("cursor.execute(query, (uid,))"));
    }

    #[test]
    fn test_min_severity_filters_findings() {
        let report = create_test_report();
        let options = ReportConfig {
            min_severity: "high".to_string(),
            ..Default::default()
        };
        let markdown = generate_markdown_report(&report, &options);

        assert!(markdown.contains("SQL injection in login"));
        assert!(!markdown.contains("Unclear variable name"));
    }

    #[test]
    fn test_snippets_can_be_disabled() {
        let report = create_test_report();
        let options = ReportConfig {
            include_snippets: false,
            ..Default::default()
        };
        let markdown = generate_markdown_report(&report, &options);
        assert!(!markdown.contains("<details>"));
    }

    #[test]
    fn test_empty_findings_message() {
        let mut report = create_test_report();
        report.findings.clear();
        report.fixes.clear();
        report.summary = FindingSummary::from_findings(&report.findings);

        let markdown = generate_markdown_report(&report, &ReportConfig::default());
        assert!(markdown.contains("No issues were found"));
        assert!(!markdown.contains("## Proposed Fixes"));
    }

    #[test]
    fn test_json_report_roundtrip() {
        let report = create_test_report();
        let json = generate_json_report(&report, &ReportConfig::default()).unwrap();

        let parsed: ReviewReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.review_id, report.review_id);
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(parsed.summary.critical, 1);
    }

    #[test]
    fn test_json_min_severity_filters_findings() {
        let report = create_test_report();
        let options = ReportConfig {
            min_severity: "high".to_string(),
            ..Default::default()
        };
        let json = generate_json_report(&report, &options).unwrap();

        assert!(!json.contains("Unclear variable name"));
        let parsed: ReviewReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].severity, Severity::Critical);
        // Summary reflects what the report actually carries.
        assert_eq!(parsed.summary.total, 1);
        assert_eq!(parsed.summary.low, 0);
        // The surviving finding keeps its fix.
        assert_eq!(parsed.fixes.len(), 1);
    }

    #[test]
    fn test_json_drops_fixes_for_filtered_findings() {
        let mut report = create_test_report();
        // Point the fix at the low finding so the filter takes both.
        report.fixes[0].finding_id = report.findings[1].finding_id.clone();
        let options = ReportConfig {
            min_severity: "high".to_string(),
            ..Default::default()
        };
        let json = generate_json_report(&report, &options).unwrap();

        let parsed: ReviewReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        assert!(parsed.fixes.is_empty());
    }

    #[test]
    fn test_write_report_to_file() {
        let report = create_test_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.md");

        write_report(&report, &ReportConfig::default(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# CodeCouncil Review"));
    }

    #[test]
    fn test_write_json_report_to_file() {
        let report = create_test_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.json");

        write_json_report(&report, &ReportConfig::default(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: ReviewReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.review_id, "abcd1234");
    }
}
