//! Capability contract and registry.
//!
//! A capability is one kind of analysis the engine can run (security
//! review, bug hunting, ...). The set is closed at engine construction:
//! plans may only reference capabilities that were registered up front.

pub mod bug;
pub mod model;
pub mod security;

use crate::events::EmitHandle;
use crate::models::{Finding, Fix};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by capability execution.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Cannot connect to Ollama at {0}")]
    Connection(String),
    #[error("Ollama API error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Malformed model response: {0}")]
    Malformed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Review cancelled")]
    Cancelled,
}

impl CapabilityError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Timeouts, connection failures, server-side errors, and malformed
    /// model output are all transient from the engine's point of view.
    /// Bad input and cancellation are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CapabilityError::Timeout(_)
            | CapabilityError::Connection(_)
            | CapabilityError::Transport(_)
            | CapabilityError::Malformed(_) => true,
            CapabilityError::Backend { status, .. } => *status >= 500 || *status == 429,
            CapabilityError::InvalidInput(_) | CapabilityError::Cancelled => false,
        }
    }
}

/// The code under review.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub filename: String,
    pub code: String,
}

impl AnalysisInput {
    pub fn new(filename: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            code: code.into(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }
}

/// Execution context handed to a capability for one step.
#[derive(Clone)]
pub struct StepContext {
    pub review_id: String,
    pub step_id: String,
    /// Direct dependencies of this step that failed. The capability still
    /// runs; this tells it which inputs are missing.
    pub upstream_failures: Vec<String>,
    /// Event sink bound to this step's source id.
    pub emit: EmitHandle,
    pub cancel: CancellationToken,
}

/// What a capability produced for one step.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutput {
    pub findings: Vec<Finding>,
    pub fixes: Vec<Fix>,
    /// One-line outcome description for the step telemetry.
    pub summary: String,
}

/// One kind of analysis the engine can run.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable id plan steps reference.
    fn capability_id(&self) -> &str;

    /// Short task description, used for telemetry.
    fn description(&self) -> &str;

    /// Runs the analysis once. Retries are the supervisor's job, not the
    /// capability's.
    async fn analyze(
        &self,
        input: &AnalysisInput,
        ctx: &StepContext,
    ) -> Result<AnalysisOutput, CapabilityError>;
}

/// Closed set of capabilities available to the engine.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.entries
            .insert(capability.capability_id().to_string(), capability);
    }

    pub fn get(&self, capability_id: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(capability_id).cloned()
    }

    pub fn contains(&self, capability_id: &str) -> bool {
        self.entries.contains_key(capability_id)
    }

    /// Registered ids, sorted for stable output.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
