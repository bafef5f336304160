//! Finding consolidation: deduplication, fix validation, ordering.
//!
//! Capabilities overlap on purpose (a SQL injection is both a security
//! hole and a bug), so the coordinator folds near-identical findings
//! into one before reporting. Two findings are duplicates when they
//! share a category, a normalized issue type, and enough location
//! overlap; the one with higher confidence survives.

use crate::models::{Finding, Fix, Location};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Fraction of the shorter line range that must overlap for two
/// locations to count as the same spot.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.5;

/// Result of deduplicating a batch of findings.
pub struct Consolidated {
    /// Survivors, in first-seen order.
    pub findings: Vec<Finding>,
    /// Removed finding id -> surviving finding id.
    pub remap: HashMap<String, String>,
    pub duplicates_removed: usize,
}

/// Folds issue-type spelling variants together: lowercase, with spaces
/// and hyphens as underscores.
pub fn normalize_issue_type(issue_type: &str) -> String {
    issue_type
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Whether two locations overlap enough to be the same spot.
///
/// Ranges are 1-based inclusive. The overlap is measured against the
/// shorter of the two ranges, so a one-line finding inside a ten-line
/// finding still matches.
pub fn locations_overlap(a: &Location, b: &Location, threshold: f64) -> bool {
    if a.file != b.file {
        return false;
    }
    let start = a.line_start.max(b.line_start);
    let end = a.line_end.min(b.line_end);
    if start > end {
        return false;
    }
    let overlap = (end - start + 1) as f64;
    let shorter = (a.line_end - a.line_start + 1).min(b.line_end - b.line_start + 1) as f64;
    overlap / shorter >= threshold
}

fn is_duplicate(a: &Finding, b: &Finding, threshold: f64) -> bool {
    a.category == b.category
        && normalize_issue_type(&a.issue_type) == normalize_issue_type(&b.issue_type)
        && locations_overlap(&a.location, &b.location, threshold)
}

/// Deduplicates findings, keeping the higher-confidence copy of each
/// duplicate pair. On equal confidence the earlier finding wins.
pub fn consolidate(findings: Vec<Finding>, threshold: f64) -> Consolidated {
    let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());
    let mut remap: HashMap<String, String> = HashMap::new();
    let mut duplicates_removed = 0usize;

    'next: for candidate in findings {
        for existing in kept.iter_mut() {
            if !is_duplicate(existing, &candidate, threshold) {
                continue;
            }
            duplicates_removed += 1;
            if candidate.confidence > existing.confidence {
                // The newcomer wins; earlier remap targets follow it.
                let old_id = existing.finding_id.clone();
                let new_id = candidate.finding_id.clone();
                for target in remap.values_mut() {
                    if *target == old_id {
                        *target = new_id.clone();
                    }
                }
                remap.insert(old_id, new_id);
                *existing = candidate;
            } else {
                remap.insert(candidate.finding_id.clone(), existing.finding_id.clone());
            }
            continue 'next;
        }
        kept.push(candidate);
    }

    Consolidated {
        findings: kept,
        remap,
        duplicates_removed,
    }
}

/// Re-points fixes at surviving findings and drops the ones left
/// dangling. Returns the valid fixes and the rejected count.
pub fn validate_fixes(
    fixes: Vec<Fix>,
    findings: &[Finding],
    remap: &HashMap<String, String>,
) -> (Vec<Fix>, usize) {
    let known: HashSet<&str> = findings.iter().map(|f| f.finding_id.as_str()).collect();
    let mut valid = Vec::with_capacity(fixes.len());
    let mut rejected = 0usize;

    for mut fix in fixes {
        if let Some(survivor) = remap.get(&fix.finding_id) {
            fix.finding_id = survivor.clone();
        }
        if known.contains(fix.finding_id.as_str()) {
            valid.push(fix);
        } else {
            debug!(fix_id = %fix.fix_id, finding_id = %fix.finding_id, "rejecting orphaned fix");
            rejected += 1;
        }
    }
    (valid, rejected)
}

/// Orders findings for the report: severity descending, then confidence
/// descending, then location.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.location.file.cmp(&b.location.file))
            .then_with(|| a.location.line_start.cmp(&b.location.line_start))
    });
}
