//! Event envelope and taxonomy.
//!
//! Every lifecycle transition in a review is published as an [`Event`]
//! with a stable envelope: `{event_type, source_id, sequence, timestamp,
//! payload}`. Any transport layer is a pure serializer of this envelope.

use crate::models::{Finding, FindingSummary, Fix, ReviewReport};
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Source id used for review-level events.
pub const SYSTEM_SOURCE: &str = "system";

/// Source id used for coordinator events.
pub const COORDINATOR_SOURCE: &str = "coordinator";

/// The kind of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ReviewStarted,
    PlanCreated,
    StepStarted,
    StepCompleted,
    AgentStarted,
    AgentCompleted,
    AgentError,
    Thinking,
    FindingDiscovered,
    FixProposed,
    FixVerified,
    FindingsConsolidated,
    FinalReport,
    ReviewCompleted,
}

impl EventKind {
    /// Wire name of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReviewStarted => "review_started",
            EventKind::PlanCreated => "plan_created",
            EventKind::StepStarted => "step_started",
            EventKind::StepCompleted => "step_completed",
            EventKind::AgentStarted => "agent_started",
            EventKind::AgentCompleted => "agent_completed",
            EventKind::AgentError => "agent_error",
            EventKind::Thinking => "thinking",
            EventKind::FindingDiscovered => "finding_discovered",
            EventKind::FixProposed => "fix_proposed",
            EventKind::FixVerified => "fix_verified",
            EventKind::FindingsConsolidated => "findings_consolidated",
            EventKind::FinalReport => "final_report",
            EventKind::ReviewCompleted => "review_completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
///
/// Events are append-only: created at the moment of the transition they
/// describe and never mutated afterwards. `sequence` is 0 until the bus
/// assigns the per-source value at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event_type: EventKind,
    /// Identity of the emitter (system, coordinator, or a step id).
    pub source_id: String,
    /// Per-source monotonically increasing sequence number.
    pub sequence: u64,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    pub payload: Value,
}

impl Event {
    fn new(event_type: EventKind, source_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            source_id: source_id.into(),
            sequence: 0,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn review_started(review_id: &str, filename: &str, code_lines: usize) -> Self {
        Self::new(
            EventKind::ReviewStarted,
            SYSTEM_SOURCE,
            json!({
                "review_id": review_id,
                "filename": filename,
                "code_lines": code_lines,
            }),
        )
    }

    pub fn plan_created(plan: &Plan) -> Self {
        Self::new(
            EventKind::PlanCreated,
            COORDINATOR_SOURCE,
            json!({
                "plan_id": plan.plan_id,
                "steps": plan.steps,
            }),
        )
    }

    /// Emitted by the coordinator before any capability event carries
    /// the same `step_id`.
    pub fn step_started(
        plan_id: &str,
        step_id: &str,
        capability_id: &str,
        upstream_failures: &[String],
    ) -> Self {
        Self::new(
            EventKind::StepStarted,
            COORDINATOR_SOURCE,
            json!({
                "plan_id": plan_id,
                "step_id": step_id,
                "capability_id": capability_id,
                "upstream_failures": upstream_failures,
            }),
        )
    }

    /// Emitted by the coordinator only after the capability's result has
    /// been fully received.
    pub fn step_completed(
        plan_id: &str,
        step_id: &str,
        capability_id: &str,
        success: bool,
        error: Option<&str>,
        duration_ms: u64,
    ) -> Self {
        Self::new(
            EventKind::StepCompleted,
            COORDINATOR_SOURCE,
            json!({
                "plan_id": plan_id,
                "step_id": step_id,
                "capability_id": capability_id,
                "status": if success { "completed" } else { "failed" },
                "error": error,
                "duration_ms": duration_ms,
            }),
        )
    }

    pub fn agent_started(source_id: &str, task: &str) -> Self {
        Self::new(
            EventKind::AgentStarted,
            source_id,
            json!({ "task": task }),
        )
    }

    pub fn agent_completed(
        source_id: &str,
        success: bool,
        findings_count: usize,
        fixes_proposed: usize,
        duration_ms: u64,
        summary: &str,
    ) -> Self {
        Self::new(
            EventKind::AgentCompleted,
            source_id,
            json!({
                "success": success,
                "findings_count": findings_count,
                "fixes_proposed": fixes_proposed,
                "duration_ms": duration_ms,
                "summary": summary,
            }),
        )
    }

    pub fn agent_error(
        source_id: &str,
        message: &str,
        recoverable: bool,
        will_retry: bool,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    ) -> Self {
        Self::new(
            EventKind::AgentError,
            source_id,
            json!({
                "message": message,
                "recoverable": recoverable,
                "will_retry": will_retry,
                "attempt": attempt,
                "max_attempts": max_attempts,
                "delay_ms": delay_ms,
            }),
        )
    }

    pub fn thinking(source_id: &str, chunk: &str) -> Self {
        Self::new(EventKind::Thinking, source_id, json!({ "chunk": chunk }))
    }

    pub fn finding_discovered(source_id: &str, finding: &Finding) -> Self {
        Self::new(EventKind::FindingDiscovered, source_id, json!(finding))
    }

    pub fn fix_proposed(source_id: &str, fix: &Fix) -> Self {
        Self::new(EventKind::FixProposed, source_id, json!(fix))
    }

    pub fn fix_verified(fix_id: &str, finding_id: &str, verified: bool) -> Self {
        Self::new(
            EventKind::FixVerified,
            COORDINATOR_SOURCE,
            json!({
                "fix_id": fix_id,
                "finding_id": finding_id,
                "verification_passed": verified,
            }),
        )
    }

    pub fn findings_consolidated(summary: &FindingSummary, duplicates_removed: usize) -> Self {
        Self::new(
            EventKind::FindingsConsolidated,
            COORDINATOR_SOURCE,
            json!({
                "total_findings": summary.total,
                "by_severity": {
                    "critical": summary.critical,
                    "high": summary.high,
                    "medium": summary.medium,
                    "low": summary.low,
                    "info": summary.info,
                },
                "by_category": summary.by_category,
                "duplicates_removed": duplicates_removed,
            }),
        )
    }

    pub fn final_report(report: &ReviewReport) -> Self {
        Self::new(EventKind::FinalReport, COORDINATOR_SOURCE, json!(report))
    }

    pub fn review_completed(review_id: &str, status: &str, duration_ms: u64) -> Self {
        Self::new(
            EventKind::ReviewCompleted,
            SYSTEM_SOURCE,
            json!({
                "review_id": review_id,
                "status": status,
                "duration_ms": duration_ms,
            }),
        )
    }
}
