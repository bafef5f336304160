//! Data models for the review engine.
//!
//! This module contains the core data structures shared across the
//! engine: findings, fixes, and the consolidated review report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Eight hex chars of a v4 uuid, enough to tell ids apart in a console.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Severity level of a finding.
///
/// Ordered ascending so that `Critical` compares greatest:
/// critical > high > medium > low > info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - observations, no action required
    Info,
    /// Low severity - style issues, minor suggestions
    Low,
    /// Medium severity - code quality issues, potential bugs
    Medium,
    /// High severity - bugs, security concerns
    High,
    /// Critical severity - exploitable vulnerabilities, major bugs
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
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

/// Category of a finding.
///
/// A closed set: capability output is folded into one of these variants
/// so the deduplication key stays well-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Bug,
    Performance,
    Quality,
    General,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Security => write!(f, "Security"),
            Category::Bug => write!(f, "Bug"),
            Category::Performance => write!(f, "Performance"),
            Category::Quality => write!(f, "Quality"),
            Category::General => write!(f, "General"),
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "security" | "injection" | "auth" | "authentication" | "crypto" | "cryptography"
            | "secrets" | "xss" | "vulnerability" => Category::Security,
            "bug" | "logic" | "error_handling" | "error-handling" | "null" | "crash"
            | "correctness" => Category::Bug,
            "performance" | "perf" | "memory" => Category::Performance,
            "quality" | "style" | "maintainability" | "best_practice" | "best practice" => {
                Category::Quality
            }
            _ => Category::General,
        }
    }
}

/// Source location of a finding, 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File the finding refers to.
    pub file: String,
    /// First line of the affected range.
    pub line_start: u32,
    /// Last line of the affected range.
    pub line_end: u32,
}

impl Location {
    /// Create a location, normalizing an inverted range.
    pub fn new(file: impl Into<String>, line_start: u32, line_end: u32) -> Self {
        let (lo, hi) = if line_end < line_start {
            (line_end, line_start)
        } else {
            (line_start, line_end)
        };
        Self {
            file: file.into(),
            line_start: lo,
            line_end: hi,
        }
    }

    /// Single-line location.
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self::new(file, line, line)
    }

    /// Returns the line range as a formatted string.
    pub fn line_range(&self) -> String {
        if self.line_end != self.line_start {
            format!("{}-{}", self.line_start, self.line_end)
        } else {
            self.line_start.to_string()
        }
    }
}

/// A single issue discovered by a capability.
///
/// `finding_id` is generated exactly once at discovery and reused
/// verbatim by every later event that references the finding. The value
/// is read-only after discovery; only consolidation may drop it in
/// favour of a higher-confidence duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Globally unique identifier, minted at discovery.
    pub finding_id: String,
    /// Canonical id of the plan step that produced this finding.
    pub step_id: String,
    /// Broad category of the finding.
    pub category: Category,
    /// Normalized issue type within the category (e.g. "sql_injection").
    pub issue_type: String,
    /// Severity of the finding.
    pub severity: Severity,
    /// Short title describing the finding.
    pub title: String,
    /// Detailed description.
    pub description: String,
    /// Source location of the finding.
    pub location: Location,
    /// Offending code, if the capability captured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    /// Suggested remediation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Capability confidence in [0, 1].
    pub confidence: f64,
}

/// Verification state of a proposed fix.
///
/// Transitions pending -> {verified, unverified} exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Unverified,
}

/// A proposed fix for a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    /// Globally unique identifier.
    pub fix_id: String,
    /// Finding this fix addresses. Must reference an existing finding;
    /// a dangling reference is rejected at consolidation.
    pub finding_id: String,
    /// The code being replaced, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
    /// The replacement code.
    pub proposed_code: String,
    /// Why the fix works.
    pub explanation: String,
    /// Capability confidence in [0, 1].
    pub confidence: f64,
    /// Current verification state.
    pub verification_status: VerificationStatus,
}

impl Fix {
    /// Resolve the verification state exactly once.
    ///
    /// Returns `false` (and changes nothing) if the fix was already
    /// resolved.
    pub fn resolve_verification(&mut self, verified: bool) -> bool {
        if self.verification_status != VerificationStatus::Pending {
            return false;
        }
        self.verification_status = if verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Unverified
        };
        true
    }
}

/// Terminal status of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Every step completed.
    Completed,
    /// At least one step completed and at least one failed.
    Partial,
    /// Every step failed.
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Completed => write!(f, "completed"),
            ReportStatus::Partial => write!(f, "partial"),
            ReportStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of findings after consolidation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingSummary {
    /// Total number of findings.
    pub total: usize,
    /// Number of critical findings.
    pub critical: usize,
    /// Number of high severity findings.
    pub high: usize,
    /// Number of medium severity findings.
    pub medium: usize,
    /// Number of low severity findings.
    pub low: usize,
    /// Number of informational findings.
    pub info: usize,
    /// Findings grouped by category.
    pub by_category: HashMap<String, usize>,
}

impl FindingSummary {
    /// Creates a summary from a list of findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };

        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Info => summary.info += 1,
            }

            *summary
                .by_category
                .entry(finding.category.to_string())
                .or_insert(0) += 1;
        }

        summary
    }
}

/// Execution counters for a finished review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewMetrics {
    /// Steps that reached `completed`.
    pub steps_completed: usize,
    /// Steps that reached `failed`.
    pub steps_failed: usize,
    /// Duplicate findings dropped during consolidation.
    pub duplicates_removed: usize,
    /// Fixes rejected for referencing an unknown finding.
    pub fixes_rejected: usize,
    /// Wall-clock duration of the review in milliseconds.
    pub duration_ms: u64,
}

/// The consolidated output of one review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    /// Review this report belongs to.
    pub review_id: String,
    /// Terminal status of the review.
    pub status: ReportStatus,
    /// One-line human summary.
    pub overview: String,
    /// Consolidated, severity-sorted findings.
    pub findings: Vec<Finding>,
    /// Validated fixes, verification resolved.
    pub fixes: Vec<Fix>,
    /// Severity/category counters.
    pub summary: FindingSummary,
    /// Execution counters.
    pub metrics: ReviewMetrics,
    /// When the report was assembled.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_finding(severity: Severity, category: Category) -> Finding {
        Finding {
            finding_id: "f-1".to_string(),
            step_id: "security".to_string(),
            category,
            issue_type: "test".to_string(),
            severity,
            title: "Test".to_string(),
            description: String::new(),
            location: Location::line("main.py", 1),
            code_snippet: None,
            suggestion: None,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_emoji() {
        assert_eq!(Severity::Critical.emoji(), "🔴");
        assert_eq!(Severity::High.emoji(), "🟠");
        assert_eq!(Severity::Medium.emoji(), "🟡");
        assert_eq!(Severity::Low.emoji(), "🟢");
        assert_eq!(Severity::Info.emoji(), "🔵");
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(Category::from("injection"), Category::Security);
        assert_eq!(Category::from("Security"), Category::Security);
        assert_eq!(Category::from("LOGIC"), Category::Bug);
        assert_eq!(Category::from("perf"), Category::Performance);
        assert_eq!(Category::from("whatever"), Category::General);
    }

    #[test]
    fn test_location_normalizes_inverted_range() {
        let loc = Location::new("a.py", 20, 10);
        assert_eq!(loc.line_start, 10);
        assert_eq!(loc.line_end, 20);
        assert_eq!(loc.line_range(), "10-20");
        assert_eq!(Location::line("a.py", 7).line_range(), "7");
    }

    #[test]
    fn test_fix_verification_transitions_once() {
        let mut fix = Fix {
            fix_id: "x-1".to_string(),
            finding_id: "f-1".to_string(),
            original_code: Some("eval(x)".to_string()),
            proposed_code: "ast.literal_eval(x)".to_string(),
            explanation: "Avoid arbitrary code execution".to_string(),
            confidence: 0.8,
            verification_status: VerificationStatus::Pending,
        };

        assert!(fix.resolve_verification(true));
        assert_eq!(fix.verification_status, VerificationStatus::Verified);

        // Second resolution is a no-op, never reopened.
        assert!(!fix.resolve_verification(false));
        assert_eq!(fix.verification_status, VerificationStatus::Verified);
    }

    #[test]
    fn test_finding_summary() {
        let findings = vec![
            make_finding(Severity::Critical, Category::Security),
            make_finding(Severity::High, Category::Bug),
            make_finding(Severity::Low, Category::Security),
        ];

        let summary = FindingSummary::from_findings(&findings);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high, 1);
        assert_eq!(summary.low, 1);
        assert_eq!(summary.info, 0);
        assert_eq!(summary.by_category.get("Security"), Some(&2));
        assert_eq!(summary.by_category.get("Bug"), Some(&1));
    }

    #[test]
    fn test_report_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::Partial).unwrap(),
            "\"partial\""
        );
        assert_eq!(ReportStatus::Failed.to_string(), "failed");
    }
}
