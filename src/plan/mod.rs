//! Review plans: named steps with dependencies, validated up front.
//!
//! A plan is the only thing the executor ever sees, so every structural
//! problem (duplicate ids, unknown dependencies, cycles) is rejected at
//! construction time rather than surfacing mid-review.

pub mod executor;

pub use executor::PlanExecutor;

use crate::models::short_id;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors detected while validating a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },
    #[error("step '{step_id}' requires unknown capability '{capability_id}'")]
    UnknownCapability {
        step_id: String,
        capability_id: String,
    },
    #[error("dependency cycle involving step '{0}'")]
    Cycle(String),
}

/// One unit of work in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique id of this step within the plan.
    pub step_id: String,
    /// Capability that executes the step.
    pub capability_id: String,
    /// Step ids that must resolve before this step starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this step may run alongside other parallel-ready steps.
    #[serde(default)]
    pub parallel: bool,
}

impl PlanStep {
    pub fn new(step_id: impl Into<String>, capability_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            capability_id: capability_id.into(),
            dependencies: Vec::new(),
            parallel: false,
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }
}

/// A validated, acyclic set of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Builds a plan with a generated id.
    pub fn new(steps: Vec<PlanStep>) -> Result<Self, PlanError> {
        Self::with_id(short_id(), steps)
    }

    /// Builds a plan with an explicit id.
    pub fn with_id(plan_id: impl Into<String>, steps: Vec<PlanStep>) -> Result<Self, PlanError> {
        let plan = Self {
            plan_id: plan_id.into(),
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Checks every step's capability against a membership predicate.
    ///
    /// The plan layer knows nothing about the registry; the caller passes
    /// whatever lookup it has.
    pub fn ensure_capabilities<F>(&self, known: F) -> Result<(), PlanError>
    where
        F: Fn(&str) -> bool,
    {
        for step in &self.steps {
            if !known(&step.capability_id) {
                return Err(PlanError::UnknownCapability {
                    step_id: step.step_id.clone(),
                    capability_id: step.capability_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.step_id.as_str()) {
                return Err(PlanError::DuplicateStep(step.step_id.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step_id: step.step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    /// Kahn's algorithm: peel zero-indegree steps; anything left over sits
    /// on a cycle.
    fn check_acyclic(&self) -> Result<(), PlanError> {
        let mut indegree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.dependencies.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.step_id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| s.dependencies.is_empty())
            .map(|s| s.step_id.as_str())
            .collect();

        let mut resolved = 0usize;
        while let Some(id) = queue.pop_front() {
            resolved += 1;
            if let Some(next) = dependents.get(id) {
                for &dependent in next {
                    let degree = indegree
                        .get_mut(dependent)
                        .ok_or_else(|| PlanError::Cycle(dependent.to_string()))?;
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if resolved < self.steps.len() {
            // First unresolved step in plan order, for a stable message.
            let stuck = self
                .steps
                .iter()
                .find(|s| indegree.get(s.step_id.as_str()).copied().unwrap_or(0) > 0)
                .map(|s| s.step_id.clone())
                .unwrap_or_default();
            return Err(PlanError::Cycle(stuck));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plan_passes() {
        let plan = Plan::with_id(
            "p1",
            vec![
                PlanStep::new("security", "security").parallel(),
                PlanStep::new("bug", "bug").parallel(),
                PlanStep::new("summary", "summary")
                    .depends_on("security")
                    .depends_on("bug"),
            ],
        );
        assert!(plan.is_ok());
        assert_eq!(plan.unwrap().len(), 3);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = Plan::with_id("p1", vec![]).unwrap_err();
        assert!(matches!(err, PlanError::Empty));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = Plan::with_id(
            "p1",
            vec![
                PlanStep::new("security", "security"),
                PlanStep::new("security", "bug"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateStep(id) if id == "security"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Plan::with_id(
            "p1",
            vec![PlanStep::new("summary", "summary").depends_on("ghost")],
        )
        .unwrap_err();
        match err {
            PlanError::UnknownDependency { step_id, dependency } => {
                assert_eq!(step_id, "summary");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Plan::with_id(
            "p1",
            vec![
                PlanStep::new("a", "security").depends_on("b"),
                PlanStep::new("b", "bug").depends_on("a"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = Plan::with_id(
            "p1",
            vec![PlanStep::new("a", "security").depends_on("a")],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Cycle(id) if id == "a"));
    }

    #[test]
    fn test_unknown_capability_reported() {
        let plan = Plan::with_id("p1", vec![PlanStep::new("style", "style")]).unwrap();
        let err = plan
            .ensure_capabilities(|id| id == "security" || id == "bug")
            .unwrap_err();
        match err {
            PlanError::UnknownCapability {
                step_id,
                capability_id,
            } => {
                assert_eq!(step_id, "style");
                assert_eq!(capability_id, "style");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
