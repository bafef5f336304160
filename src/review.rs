//! Submission boundary: reviews go in, event streams and reports come out.
//!
//! The engine owns one bus, one cancellation token, and one running
//! coordinator task per review. Callers get a review id back immediately
//! and observe progress by subscribing to the review's stream; `wait`
//! hands over the final result exactly once.

use crate::capability::bug::BugCapability;
use crate::capability::model::ModelClient;
use crate::capability::security::SecurityCapability;
use crate::capability::{AnalysisInput, CapabilityRegistry};
use crate::config::Config;
use crate::coordinator::{Coordinator, ReviewError};
use crate::events::{EventBus, EventStream};
use crate::models::{short_id, ReviewReport};
use crate::retry::{RetryPolicy, RetrySupervisor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct ReviewHandle {
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    /// Taken by the first `wait` call.
    task: Option<JoinHandle<Result<ReviewReport, ReviewError>>>,
}

/// Runs reviews and tracks the live ones.
pub struct ReviewEngine {
    config: Config,
    registry: Arc<CapabilityRegistry>,
    reviews: Mutex<HashMap<String, ReviewHandle>>,
}

impl ReviewEngine {
    /// Builds the engine with the standard capability set: security
    /// review and bug hunting over one shared model client.
    pub fn new(config: Config) -> Self {
        let client = Arc::new(ModelClient::new(config.model.clone()));
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(SecurityCapability::new(client.clone())));
        registry.register(Arc::new(BugCapability::new(client)));
        Self::with_registry(config, registry)
    }

    /// Builds the engine over an explicit capability set.
    pub fn with_registry(config: Config, registry: CapabilityRegistry) -> Self {
        debug!(capabilities = registry.len(), "review engine ready");
        Self {
            config,
            registry: Arc::new(registry),
            reviews: Mutex::new(HashMap::new()),
        }
    }

    pub fn capability_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Starts a review and returns its id immediately.
    ///
    /// Must be called from within a tokio runtime; the coordinator runs
    /// as a spawned task.
    pub fn submit(&self, input: AnalysisInput) -> String {
        let review_id = short_id();
        let bus = Arc::new(EventBus::new(
            self.config.bus.queue_capacity,
            self.config.bus.history_limit,
        ));
        let cancel = CancellationToken::new();
        let supervisor = RetrySupervisor::new(
            RetryPolicy {
                max_attempts: self.config.retry.max_attempts,
                base_delay: Duration::from_millis(self.config.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.config.retry.max_delay_ms),
            },
            Duration::from_secs(self.config.retry.timeout_seconds),
        );

        let coordinator = Coordinator::new(
            review_id.clone(),
            input,
            self.registry.clone(),
            bus.clone(),
            supervisor,
            self.config.consolidation.overlap_threshold,
            cancel.clone(),
        );
        let task = tokio::spawn(coordinator.run());

        self.lock_reviews().insert(
            review_id.clone(),
            ReviewHandle {
                bus,
                cancel,
                task: Some(task),
            },
        );
        info!(review = %review_id, "review submitted");
        review_id
    }

    /// Subscribes to a review's event stream, replaying whatever was
    /// already published before delivering live events.
    ///
    /// Returns `None` for unknown review ids.
    pub fn subscribe(&self, review_id: &str) -> Option<EventStream> {
        self.lock_reviews()
            .get(review_id)
            .map(|handle| handle.bus.subscribe_with_history())
    }

    /// Requests cancellation of a running review. Returns whether the id
    /// was known.
    pub fn cancel(&self, review_id: &str) -> bool {
        match self.lock_reviews().get(review_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits for a review to finish and returns its result.
    ///
    /// Returns `None` for unknown ids or when the result was already
    /// consumed by an earlier `wait`.
    pub async fn wait(&self, review_id: &str) -> Option<Result<ReviewReport, ReviewError>> {
        let task = self.lock_reviews().get_mut(review_id)?.task.take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(err) => Some(Err(ReviewError::Internal(err.to_string()))),
        }
    }

    /// Drops all bookkeeping for a review, including its event history.
    pub fn remove(&self, review_id: &str) -> bool {
        self.lock_reviews().remove(review_id).is_some()
    }

    fn lock_reviews(&self) -> MutexGuard<'_, HashMap<String, ReviewHandle>> {
        match self.reviews.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
