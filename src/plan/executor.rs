//! Dependency-ordered execution state over a validated plan.
//!
//! The executor is a synchronous state machine: it decides which steps
//! may run next and records outcomes, while the coordinator owns the
//! actual spawning and awaiting. A failed dependency never blocks its
//! dependents; they still run, carrying the failed step ids in their
//! context.

use super::{Plan, PlanStep};
use std::collections::HashMap;

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Waiting on at least one unresolved dependency.
    Pending,
    /// All dependencies resolved; handed out by [`PlanExecutor::next_batch`].
    Ready,
    /// Currently executing.
    Running,
    Completed,
    Failed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Failed)
    }
}

/// Tracks step states and computes ready batches.
pub struct PlanExecutor {
    plan: Plan,
    states: HashMap<String, StepState>,
}

impl PlanExecutor {
    pub fn new(plan: Plan) -> Self {
        let states = plan
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), StepState::Pending))
            .collect();
        Self { plan, states }
    }

    pub fn state(&self, step_id: &str) -> Option<StepState> {
        self.states.get(step_id).copied()
    }

    /// Marks the next runnable steps `Ready` and returns them.
    ///
    /// If any parallel-flagged steps are runnable they are all returned as
    /// one batch; otherwise the first runnable sequential step (in plan
    /// order) is returned alone. An empty result means either the plan is
    /// finished or steps are still in flight.
    pub fn next_batch(&mut self) -> Vec<PlanStep> {
        let runnable: Vec<PlanStep> = self
            .plan
            .steps
            .iter()
            .filter(|step| self.states.get(step.step_id.as_str()) == Some(&StepState::Pending))
            .filter(|step| {
                step.dependencies.iter().all(|dep| {
                    self.states
                        .get(dep.as_str())
                        .is_some_and(|s| s.is_terminal())
                })
            })
            .cloned()
            .collect();

        let batch: Vec<PlanStep> = if runnable.iter().any(|s| s.parallel) {
            runnable.into_iter().filter(|s| s.parallel).collect()
        } else {
            runnable.into_iter().take(1).collect()
        };

        for step in &batch {
            self.states.insert(step.step_id.clone(), StepState::Ready);
        }
        batch
    }

    pub fn mark_running(&mut self, step_id: &str) {
        debug_assert_eq!(self.state(step_id), Some(StepState::Ready));
        self.states.insert(step_id.to_string(), StepState::Running);
    }

    pub fn mark_completed(&mut self, step_id: &str) {
        debug_assert_eq!(self.state(step_id), Some(StepState::Running));
        self.states
            .insert(step_id.to_string(), StepState::Completed);
    }

    pub fn mark_failed(&mut self, step_id: &str) {
        debug_assert_eq!(self.state(step_id), Some(StepState::Running));
        self.states.insert(step_id.to_string(), StepState::Failed);
    }

    /// Direct dependencies of `step_id` that ended in `Failed`, in the
    /// order the step declared them.
    pub fn upstream_failures(&self, step_id: &str) -> Vec<String> {
        let Some(step) = self.plan.step(step_id) else {
            return Vec::new();
        };
        step.dependencies
            .iter()
            .filter(|dep| self.state(dep) == Some(StepState::Failed))
            .cloned()
            .collect()
    }

    /// True once every step has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    pub fn completed_steps(&self) -> Vec<String> {
        self.steps_in_state(StepState::Completed)
    }

    pub fn failed_steps(&self) -> Vec<String> {
        self.steps_in_state(StepState::Failed)
    }

    fn steps_in_state(&self, wanted: StepState) -> Vec<String> {
        self.plan
            .steps
            .iter()
            .filter(|s| self.state(&s.step_id) == Some(wanted))
            .map(|s| s.step_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan_in_plan() -> Plan {
        Plan::with_id(
            "p1",
            vec![
                PlanStep::new("security", "security").parallel(),
                PlanStep::new("bug", "bug").parallel(),
                PlanStep::new("summary", "summary")
                    .depends_on("security")
                    .depends_on("bug"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parallel_steps_form_one_batch() {
        let mut exec = PlanExecutor::new(fan_in_plan());

        let batch = exec.next_batch();
        let ids: Vec<&str> = batch.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["security", "bug"]);
        assert_eq!(exec.state("summary"), Some(StepState::Pending));
    }

    #[test]
    fn test_dependent_not_ready_until_all_dependencies_resolve() {
        let mut exec = PlanExecutor::new(fan_in_plan());
        for step in exec.next_batch() {
            exec.mark_running(&step.step_id);
        }
        exec.mark_completed("security");

        // Bug is still running, so nothing new may start.
        assert!(exec.next_batch().is_empty());

        exec.mark_completed("bug");
        let batch = exec.next_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].step_id, "summary");
    }

    #[test]
    fn test_failed_dependency_does_not_block_dependent() {
        let mut exec = PlanExecutor::new(fan_in_plan());
        for step in exec.next_batch() {
            exec.mark_running(&step.step_id);
        }
        exec.mark_completed("security");
        exec.mark_failed("bug");

        let batch = exec.next_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].step_id, "summary");
        assert_eq!(exec.upstream_failures("summary"), vec!["bug".to_string()]);
    }

    #[test]
    fn test_sequential_steps_run_one_at_a_time() {
        let plan = Plan::with_id(
            "p1",
            vec![
                PlanStep::new("a", "security"),
                PlanStep::new("b", "bug"),
            ],
        )
        .unwrap();
        let mut exec = PlanExecutor::new(plan);

        let first = exec.next_batch();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].step_id, "a");

        exec.mark_running("a");
        exec.mark_completed("a");

        let second = exec.next_batch();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].step_id, "b");
    }

    #[test]
    fn test_parallel_batch_preferred_over_sequential() {
        let plan = Plan::with_id(
            "p1",
            vec![
                PlanStep::new("solo", "security"),
                PlanStep::new("left", "bug").parallel(),
                PlanStep::new("right", "quality").parallel(),
            ],
        )
        .unwrap();
        let mut exec = PlanExecutor::new(plan);

        let batch = exec.next_batch();
        let ids: Vec<&str> = batch.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["left", "right"]);
    }

    #[test]
    fn test_is_done_requires_all_terminal() {
        let mut exec = PlanExecutor::new(fan_in_plan());
        assert!(!exec.is_done());

        for step in exec.next_batch() {
            exec.mark_running(&step.step_id);
        }
        exec.mark_completed("security");
        exec.mark_failed("bug");
        assert!(!exec.is_done());

        for step in exec.next_batch() {
            exec.mark_running(&step.step_id);
        }
        exec.mark_completed("summary");
        assert!(exec.is_done());

        assert_eq!(
            exec.completed_steps(),
            vec!["security".to_string(), "summary".to_string()]
        );
        assert_eq!(exec.failed_steps(), vec!["bug".to_string()]);
    }
}
