//! Review coordinator: drives a plan to completion.
//!
//! The coordinator owns the async side of execution. It asks the plan
//! executor which steps may run, fans parallel batches out over
//! [`FuturesUnordered`], and waits for the whole batch before touching
//! shared state: consolidation only ever happens at a batch barrier,
//! never while a step is in flight.

use crate::capability::{
    AnalysisInput, AnalysisOutput, CapabilityError, CapabilityRegistry, StepContext,
};
use crate::consolidate::{consolidate, sort_findings, validate_fixes};
use crate::events::{EmitHandle, Event, EventBus};
use crate::models::{
    Finding, FindingSummary, Fix, ReportStatus, ReviewMetrics, ReviewReport,
};
use crate::plan::{Plan, PlanError, PlanExecutor, PlanStep};
use crate::retry::RetrySupervisor;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a review can fail as a whole.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
    /// Every step failed. Carries the best-effort failure report that was
    /// also published on the bus.
    #[error("all capabilities failed")]
    AllCapabilitiesFailed(Box<ReviewReport>),
    #[error("review cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Drives one review from plan to final report.
pub struct Coordinator {
    review_id: String,
    input: Arc<AnalysisInput>,
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    supervisor: RetrySupervisor,
    overlap_threshold: f64,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        review_id: String,
        input: AnalysisInput,
        registry: Arc<CapabilityRegistry>,
        bus: Arc<EventBus>,
        supervisor: RetrySupervisor,
        overlap_threshold: f64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            review_id,
            input: Arc::new(input),
            registry,
            bus,
            supervisor,
            overlap_threshold,
            cancel,
        }
    }

    /// The default plan: every registered capability as one parallel
    /// step, in sorted id order so the plan is deterministic for a given
    /// registry.
    pub fn standard_plan(&self) -> Result<Plan, PlanError> {
        if self.registry.is_empty() {
            return Err(PlanError::Empty);
        }
        let steps: Vec<PlanStep> = self
            .registry
            .ids()
            .into_iter()
            .map(|id| PlanStep::new(id.clone(), id).parallel())
            .collect();
        Plan::new(steps)
    }

    /// Runs the standard plan.
    pub async fn run(self) -> Result<ReviewReport, ReviewError> {
        let plan = self.standard_plan()?;
        self.run_plan(plan).await
    }

    /// Runs an explicit plan.
    pub async fn run_plan(self, plan: Plan) -> Result<ReviewReport, ReviewError> {
        plan.ensure_capabilities(|id| self.registry.contains(id))?;

        let started = Instant::now();
        self.bus.publish(Event::review_started(
            &self.review_id,
            &self.input.filename,
            self.input.line_count(),
        ));
        self.bus.publish(Event::plan_created(&plan));
        info!(review = %self.review_id, steps = plan.len(), "plan created");

        let plan_id = plan.plan_id.clone();
        let mut executor = PlanExecutor::new(plan);

        // Consolidated so far; only touched at batch barriers.
        let mut findings: Vec<Finding> = Vec::new();
        let mut fixes: Vec<Fix> = Vec::new();
        let mut remap: HashMap<String, String> = HashMap::new();
        let mut duplicates_removed = 0usize;
        let mut step_errors: Vec<(String, String)> = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(started);
            }

            let batch = executor.next_batch();
            if batch.is_empty() {
                if executor.is_done() {
                    break;
                }
                warn!(review = %self.review_id, "no runnable steps but plan not finished");
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for step in batch {
                executor.mark_running(&step.step_id);

                let Some(capability) = self.registry.get(&step.capability_id) else {
                    // ensure_capabilities ran, so this is unreachable in
                    // practice; fail the step rather than the process.
                    executor.mark_failed(&step.step_id);
                    self.bus.publish(Event::step_completed(
                        &plan_id,
                        &step.step_id,
                        &step.capability_id,
                        false,
                        Some("capability not registered"),
                        0,
                    ));
                    step_errors.push((step.step_id, "capability not registered".to_string()));
                    continue;
                };

                let upstream = executor.upstream_failures(&step.step_id);
                self.bus.publish(Event::step_started(
                    &plan_id,
                    &step.step_id,
                    &step.capability_id,
                    &upstream,
                ));

                let emit = EmitHandle::new(self.bus.clone(), step.step_id.clone());
                let ctx = StepContext {
                    review_id: self.review_id.clone(),
                    step_id: step.step_id.clone(),
                    upstream_failures: upstream,
                    emit: emit.clone(),
                    cancel: self.cancel.clone(),
                };
                let supervisor = self.supervisor.clone();
                let input = self.input.clone();
                let task = capability.description().to_string();
                let step_id = step.step_id.clone();
                let capability_id = step.capability_id.clone();

                in_flight.push(async move {
                    emit.agent_started(&task);
                    let cancel = ctx.cancel.clone();
                    let step_started = Instant::now();
                    let result = supervisor
                        .invoke(&emit, &cancel, |_attempt| {
                            let capability = capability.clone();
                            let input = input.clone();
                            let ctx = ctx.clone();
                            async move { capability.analyze(&input, &ctx).await }
                        })
                        .await;
                    let duration_ms = step_started.elapsed().as_millis() as u64;
                    (step_id, capability_id, emit, result, duration_ms)
                });
            }

            // Barrier: every step in the batch resolves before any
            // consolidation happens.
            let mut batch_outputs: Vec<AnalysisOutput> = Vec::new();
            while let Some((step_id, capability_id, emit, result, duration_ms)) =
                in_flight.next().await
            {
                match result {
                    Ok(output) => {
                        emit.agent_completed(
                            true,
                            output.findings.len(),
                            output.fixes.len(),
                            duration_ms,
                            &output.summary,
                        );
                        self.bus.publish(Event::step_completed(
                            &plan_id,
                            &step_id,
                            &capability_id,
                            true,
                            None,
                            duration_ms,
                        ));
                        executor.mark_completed(&step_id);
                        batch_outputs.push(output);
                    }
                    Err(CapabilityError::Cancelled) => {
                        return self.cancelled(started);
                    }
                    Err(err) => {
                        let message = err.to_string();
                        emit.agent_completed(false, 0, 0, duration_ms, &message);
                        self.bus.publish(Event::step_completed(
                            &plan_id,
                            &step_id,
                            &capability_id,
                            false,
                            Some(&message),
                            duration_ms,
                        ));
                        executor.mark_failed(&step_id);
                        step_errors.push((step_id, message));
                    }
                }
            }

            if batch_outputs.is_empty() {
                continue;
            }

            let mut pool = std::mem::take(&mut findings);
            for output in batch_outputs {
                pool.extend(output.findings);
                fixes.extend(output.fixes);
            }
            let outcome = consolidate(pool, self.overlap_threshold);
            findings = outcome.findings;
            duplicates_removed += outcome.duplicates_removed;
            // Chase earlier remap targets that were themselves removed at
            // this barrier.
            for target in remap.values_mut() {
                if let Some(next) = outcome.remap.get(target) {
                    *target = next.clone();
                }
            }
            remap.extend(outcome.remap);

            self.bus.publish(Event::findings_consolidated(
                &FindingSummary::from_findings(&findings),
                duplicates_removed,
            ));
        }

        let steps_completed = executor.completed_steps().len();
        let failed_steps = executor.failed_steps();

        if steps_completed == 0 {
            return self.all_failed(started, failed_steps.len(), &step_errors);
        }

        let status = if failed_steps.is_empty() {
            ReportStatus::Completed
        } else {
            ReportStatus::Partial
        };

        let (mut fixes, fixes_rejected) = validate_fixes(fixes, &findings, &remap);
        for fix in fixes.iter_mut() {
            let verified = verify_fix(fix);
            fix.resolve_verification(verified);
            self.bus
                .publish(Event::fix_verified(&fix.fix_id, &fix.finding_id, verified));
        }

        sort_findings(&mut findings);
        let summary = FindingSummary::from_findings(&findings);
        let overview = build_overview(
            &self.input.filename,
            status,
            &summary,
            steps_completed,
            &failed_steps,
        );

        let report = ReviewReport {
            review_id: self.review_id.clone(),
            status,
            overview,
            findings,
            fixes,
            summary,
            metrics: ReviewMetrics {
                steps_completed,
                steps_failed: failed_steps.len(),
                duplicates_removed,
                fixes_rejected,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            created_at: Utc::now(),
        };

        self.bus.publish(Event::final_report(&report));
        self.bus.publish(Event::review_completed(
            &self.review_id,
            &report.status.to_string(),
            report.metrics.duration_ms,
        ));
        info!(
            review = %self.review_id,
            status = %report.status,
            findings = report.summary.total,
            "review finished"
        );
        Ok(report)
    }

    fn cancelled(&self, started: Instant) -> Result<ReviewReport, ReviewError> {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus
            .publish(Event::review_completed(&self.review_id, "cancelled", duration_ms));
        info!(review = %self.review_id, "review cancelled");
        Err(ReviewError::Cancelled)
    }

    /// Best-effort failure report: published for stream consumers, then
    /// handed back inside the error.
    fn all_failed(
        &self,
        started: Instant,
        steps_failed: usize,
        step_errors: &[(String, String)],
    ) -> Result<ReviewReport, ReviewError> {
        let details: Vec<String> = step_errors
            .iter()
            .map(|(step, err)| format!("{step}: {err}"))
            .collect();
        let report = ReviewReport {
            review_id: self.review_id.clone(),
            status: ReportStatus::Failed,
            overview: format!(
                "Review of {} failed: every step failed ({})",
                self.input.filename,
                details.join("; ")
            ),
            findings: Vec::new(),
            fixes: Vec::new(),
            summary: FindingSummary::from_findings(&[]),
            metrics: ReviewMetrics {
                steps_completed: 0,
                steps_failed,
                duplicates_removed: 0,
                fixes_rejected: 0,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            created_at: Utc::now(),
        };

        self.bus.publish(Event::final_report(&report));
        self.bus.publish(Event::review_completed(
            &self.review_id,
            &report.status.to_string(),
            report.metrics.duration_ms,
        ));
        warn!(review = %self.review_id, "all capabilities failed");
        Err(ReviewError::AllCapabilitiesFailed(Box::new(report)))
    }
}

/// Structural fix check: a fix is credible when it proposes non-empty
/// code that actually differs from what it replaces.
fn verify_fix(fix: &Fix) -> bool {
    let proposed = fix.proposed_code.trim();
    if proposed.is_empty() {
        return false;
    }
    match &fix.original_code {
        Some(original) => original.trim() != proposed,
        None => true,
    }
}

fn build_overview(
    filename: &str,
    status: ReportStatus,
    summary: &FindingSummary,
    steps_completed: usize,
    failed_steps: &[String],
) -> String {
    let mut overview = format!(
        "Reviewed {}: {} findings ({} critical, {} high) across {} completed steps",
        filename, summary.total, summary.critical, summary.high, steps_completed
    );
    if status == ReportStatus::Partial {
        overview.push_str(&format!("; failed steps: {}", failed_steps.join(", ")));
    }
    overview
}
