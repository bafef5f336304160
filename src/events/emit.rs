//! Emission sink handed to capabilities.
//!
//! A capability never talks to the bus directly; it gets an [`EmitHandle`]
//! pre-bound to its step's source id, so every event it emits carries the
//! identity the coordinator assigned and nothing else.

use crate::events::bus::EventBus;
use crate::events::types::Event;
use crate::models::{Finding, Fix};
use std::sync::Arc;

/// Write-only event sink bound to one source id.
#[derive(Clone)]
pub struct EmitHandle {
    bus: Arc<EventBus>,
    source_id: String,
}

impl EmitHandle {
    pub fn new(bus: Arc<EventBus>, source_id: impl Into<String>) -> Self {
        Self {
            bus,
            source_id: source_id.into(),
        }
    }

    /// The source id stamped on everything emitted through this handle.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn agent_started(&self, task: &str) {
        self.bus.publish(Event::agent_started(&self.source_id, task));
    }

    pub fn agent_completed(
        &self,
        success: bool,
        findings_count: usize,
        fixes_proposed: usize,
        duration_ms: u64,
        summary: &str,
    ) {
        self.bus.publish(Event::agent_completed(
            &self.source_id,
            success,
            findings_count,
            fixes_proposed,
            duration_ms,
            summary,
        ));
    }

    pub fn thinking(&self, chunk: &str) {
        self.bus.publish(Event::thinking(&self.source_id, chunk));
    }

    pub fn finding_discovered(&self, finding: &Finding) {
        self.bus
            .publish(Event::finding_discovered(&self.source_id, finding));
    }

    pub fn fix_proposed(&self, fix: &Fix) {
        self.bus.publish(Event::fix_proposed(&self.source_id, fix));
    }

    /// Telemetry for a recoverable failure that will be retried after
    /// `delay_ms`. Published before the supervisor starts waiting.
    pub fn retrying(&self, message: &str, attempt: u32, max_attempts: u32, delay_ms: u64) {
        self.bus.publish(Event::agent_error(
            &self.source_id,
            message,
            true,
            true,
            attempt,
            max_attempts,
            delay_ms,
        ));
    }

    /// Telemetry for a failure that will not be retried.
    pub fn failed(&self, message: &str, recoverable: bool, attempt: u32, max_attempts: u32) {
        self.bus.publish(Event::agent_error(
            &self.source_id,
            message,
            recoverable,
            false,
            attempt,
            max_attempts,
            0,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventKind;

    #[tokio::test]
    async fn test_handle_stamps_bound_source() {
        let bus = Arc::new(EventBus::default());
        let mut stream = bus.subscribe();
        let handle = EmitHandle::new(bus.clone(), "security");

        handle.agent_started("scan for injection");
        handle.thinking("looking at line 42");

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.source_id, "security");
        assert_eq!(first.event_type, EventKind::AgentStarted);
        assert_eq!(second.source_id, "security");
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn test_retrying_marks_will_retry() {
        let bus = Arc::new(EventBus::default());
        let mut stream = bus.subscribe();
        let handle = EmitHandle::new(bus.clone(), "bug");

        handle.retrying("connection refused", 1, 3, 400);
        handle.failed("schema mismatch", false, 1, 3);

        let retry = stream.recv().await.unwrap();
        assert_eq!(retry.event_type, EventKind::AgentError);
        assert_eq!(retry.payload["will_retry"], true);
        assert_eq!(retry.payload["delay_ms"], 400);

        let fatal = stream.recv().await.unwrap();
        assert_eq!(fatal.payload["will_retry"], false);
        assert_eq!(fatal.payload["recoverable"], false);
    }
}
