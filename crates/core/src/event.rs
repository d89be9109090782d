//! Domain events: decoupled observation of running sessions.
//!
//! Events are published when something interesting happens in a session.
//! Audit loggers and dashboards subscribe without the kernel depending on
//! their implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::session::{Disposition, LoopStatus};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A requested action was resolved (executed, denied, or rejected)
    ActionResolved {
        session_id: String,
        action_name: String,
        disposition: Disposition,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// One think-act cycle finished
    IterationCompleted {
        session_id: String,
        iteration: u32,
        total_tokens: u64,
        timestamp: DateTime<Utc>,
    },

    /// A session reached a terminal status
    SessionFinished {
        session_id: String,
        status: LoopStatus,
        iterations: u32,
        cost_usd: f64,
        timestamp: DateTime<Utc>,
    },

    /// A session failed with an unrecoverable error
    SessionErrored {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
