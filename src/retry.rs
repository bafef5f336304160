//! Retry supervision for capability invocations.
//!
//! The supervisor wraps each invocation with a timeout, classifies
//! failures, and retries recoverable ones with exponential backoff.
//! Telemetry goes out on the bus before every wait, so a live consumer
//! sees "will retry in N ms" in real time rather than after the fact.

use crate::capability::CapabilityError;
use crate::events::EmitHandle;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff parameters for one class of work.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry after that.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n`: `min(max_delay, base_delay * 2^(n-2))`.
    ///
    /// Attempt 1 runs immediately, so `n` here is always >= 2.
    pub fn backoff_delay(&self, n: u32) -> Duration {
        let shift = n.saturating_sub(2).min(20);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << shift);
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Runs capability invocations under a retry policy and a per-attempt
/// timeout.
#[derive(Debug, Clone)]
pub struct RetrySupervisor {
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetrySupervisor {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// Invokes `op` until it succeeds, fails non-recoverably, or the
    /// attempt budget runs out.
    ///
    /// `op` is called with the 1-based attempt number and must produce a
    /// fresh future per call. Cancellation is observed between attempts,
    /// during the backoff wait, and while an attempt is in flight.
    pub async fn invoke<T, F, Fut>(
        &self,
        emit: &EmitHandle,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, CapabilityError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(CapabilityError::Cancelled),
                res = tokio::time::timeout(self.timeout, op(attempt)) => res,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(source = emit.source_id(), attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => CapabilityError::Timeout(self.timeout.as_secs()),
            };

            if !error.is_recoverable() {
                emit.failed(&error.to_string(), false, attempt, max_attempts);
                return Err(error);
            }

            if attempt == max_attempts {
                warn!(
                    source = emit.source_id(),
                    attempt, "retries exhausted: {error}"
                );
                emit.failed(&error.to_string(), true, attempt, max_attempts);
                return Err(error);
            }

            let delay = self.policy.backoff_delay(attempt + 1);
            emit.retrying(
                &error.to_string(),
                attempt,
                max_attempts,
                delay.as_millis() as u64,
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(CapabilityError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // max_attempts >= 1 means the loop always returns from inside.
        Err(CapabilityError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_supervisor(max_attempts: u32) -> RetrySupervisor {
        RetrySupervisor::new(
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(1600));
        // 3200 would exceed the ceiling.
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(3000));
        assert_eq!(policy.backoff_delay(12), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_recoverable_failures_retry_until_success() {
        let bus = Arc::new(EventBus::default());
        let emit = EmitHandle::new(bus.clone(), "security");
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = fast_supervisor(3)
            .invoke(&emit, &cancel, move |_attempt| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapabilityError::Connection("http://localhost:11434".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Two failures before success means exactly two retry events.
        let errors = bus.history_matching(Some(EventKind::AgentError), None);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].payload["will_retry"], true);
        assert_eq!(errors[0].payload["attempt"], 1);
        assert_eq!(errors[0].payload["delay_ms"], 1);
        assert_eq!(errors[1].payload["attempt"], 2);
        assert_eq!(errors[1].payload["delay_ms"], 2);
    }

    #[tokio::test]
    async fn test_non_recoverable_fails_immediately() {
        let bus = Arc::new(EventBus::default());
        let emit = EmitHandle::new(bus.clone(), "bug");
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = fast_supervisor(3)
            .invoke(&emit, &cancel, move |_attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CapabilityError::InvalidInput("empty file".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let errors = bus.history_matching(Some(EventKind::AgentError), None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["will_retry"], false);
        assert_eq!(errors[0].payload["recoverable"], false);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let bus = Arc::new(EventBus::default());
        let emit = EmitHandle::new(bus.clone(), "security");
        let cancel = CancellationToken::new();

        let result: Result<(), _> = fast_supervisor(2)
            .invoke(&emit, &cancel, |_attempt| async {
                Err(CapabilityError::Connection("http://localhost:11434".into()))
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Connection(_))));

        let errors = bus.history_matching(Some(EventKind::AgentError), None);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].payload["will_retry"], true);
        assert_eq!(errors[1].payload["will_retry"], false);
        assert_eq!(errors[1].payload["recoverable"], true);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_recoverable() {
        let bus = Arc::new(EventBus::default());
        let emit = EmitHandle::new(bus.clone(), "security");
        let cancel = CancellationToken::new();
        let supervisor = RetrySupervisor::new(
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            Duration::from_millis(10),
        );

        let result: Result<(), _> = supervisor
            .invoke(&emit, &cancel, |_attempt| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let bus = Arc::new(EventBus::default());
        let emit = EmitHandle::new(bus.clone(), "security");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = fast_supervisor(3)
            .invoke(&emit, &cancel, move |_attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(CapabilityError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
