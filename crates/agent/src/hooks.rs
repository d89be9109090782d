//! Lifecycle hooks for external observers.
//!
//! Hooks run synchronously on the session's task, so they should be quick.
//! Anything slow belongs behind the [`EventBusHooks`] adapter and a
//! subscriber of its bus.

use chrono::Utc;
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::session::{ActionRecord, SessionId, SessionResult};
use std::sync::Arc;

/// Every method defaults to a no-op.
pub trait LoopHooks: Send + Sync {
    /// After each requested action is resolved, whatever its disposition.
    fn on_action(&self, _session_id: &SessionId, _record: &ActionRecord) {}

    /// After each iteration, including the one that completes the session.
    fn on_iteration(&self, _session_id: &SessionId, _iteration: u32, _total_tokens: u64) {}

    /// Once per session with the final result, whatever its status.
    fn on_complete(&self, _result: &SessionResult) {}

    /// When the session ends as `errored`, just before `on_complete`.
    fn on_error(&self, _session_id: &SessionId, _error: &str) {}
}

/// Republishes hook calls as [`DomainEvent`]s.
pub struct EventBusHooks {
    bus: Arc<EventBus>,
}

impl EventBusHooks {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl LoopHooks for EventBusHooks {
    fn on_action(&self, session_id: &SessionId, record: &ActionRecord) {
        self.bus.publish(DomainEvent::ActionResolved {
            session_id: session_id.to_string(),
            action_name: record.name.clone(),
            disposition: record.disposition,
            success: record.output.success,
            duration_ms: record.duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn on_iteration(&self, session_id: &SessionId, iteration: u32, total_tokens: u64) {
        self.bus.publish(DomainEvent::IterationCompleted {
            session_id: session_id.to_string(),
            iteration,
            total_tokens,
            timestamp: Utc::now(),
        });
    }

    fn on_complete(&self, result: &SessionResult) {
        self.bus.publish(DomainEvent::SessionFinished {
            session_id: result.session_id.to_string(),
            status: result.status,
            iterations: result.iterations,
            cost_usd: result.cost_usd,
            timestamp: Utc::now(),
        });
    }

    fn on_error(&self, session_id: &SessionId, error: &str) {
        self.bus.publish(DomainEvent::SessionErrored {
            session_id: session_id.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
