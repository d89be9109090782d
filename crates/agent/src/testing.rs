//! Test doubles for driving a [`LoopEngine`](crate::LoopEngine) without real
//! backends or tools.
//!
//! - [`ScriptedExecutor`]: fixed outcome per action name, `not found` otherwise
//! - [`RecordingHooks`]: remembers every hook call
//! - [`FixedApprover`]: answers every approval request the same way
//! - [`mock_resolver`]: a resolver with one provider and no credentials

use async_trait::async_trait;
use helmsman_core::error::ApprovalError;
use helmsman_core::provider::{ActionDefinition, Provider};
use helmsman_core::session::{ActionRecord, LoopStatus, SessionId, SessionResult};
use helmsman_core::tool::{ActionExecutor, ActionOutcome, ExecutionScope};
use helmsman_providers::{KeyManager, ModelResolver};
use helmsman_telemetry::CostTracker;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::gate::{ApprovalDecision, ApprovalRequest, ApprovalRequester};
use crate::hooks::LoopHooks;

/// A resolver over `provider` alone, with a fresh ledger and key pool.
pub fn mock_resolver(provider: Arc<dyn Provider>) -> Arc<ModelResolver> {
    let resolver = ModelResolver::new(Arc::new(KeyManager::default()), Arc::new(CostTracker::new()));
    resolver.register(provider, &[]);
    Arc::new(resolver)
}

#[derive(Default)]
pub struct ScriptedExecutor {
    actions: Vec<(ActionDefinition, ActionOutcome)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`; every call to it returns `outcome`.
    pub fn with_action(mut self, name: &str, outcome: ActionOutcome) -> Self {
        let definition = ActionDefinition {
            name: name.to_string(),
            description: format!("Scripted action {name}"),
            parameters: serde_json::json!({"type": "object"}),
        };
        self.actions.push((definition, outcome));
        self
    }

    /// Sleep (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Names of the actions executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    fn definitions(&self) -> Vec<ActionDefinition> {
        self.actions.iter().map(|(d, _)| d.clone()).collect()
    }

    async fn execute(
        &self,
        name: &str,
        _input: serde_json::Value,
        _scope: &ExecutionScope,
    ) -> ActionOutcome {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.actions
            .iter()
            .find(|(d, _)| d.name == name)
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| ActionOutcome::failure("not found"))
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    actions: Mutex<Vec<ActionRecord>>,
    iterations: Mutex<Vec<u32>>,
    completed: Mutex<Vec<LoopStatus>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingHooks {
    /// Names of resolved actions, in order.
    pub fn actions(&self) -> Vec<String> {
        lock(&self.actions).iter().map(|r| r.name.clone()).collect()
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        lock(&self.actions).clone()
    }

    pub fn iterations(&self) -> Vec<u32> {
        lock(&self.iterations).clone()
    }

    pub fn completed(&self) -> Vec<LoopStatus> {
        lock(&self.completed).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl LoopHooks for RecordingHooks {
    fn on_action(&self, _session_id: &SessionId, record: &ActionRecord) {
        lock(&self.actions).push(record.clone());
    }

    fn on_iteration(&self, _session_id: &SessionId, iteration: u32, _total_tokens: u64) {
        lock(&self.iterations).push(iteration);
    }

    fn on_complete(&self, result: &SessionResult) {
        lock(&self.completed).push(result.status);
    }

    fn on_error(&self, _session_id: &SessionId, error: &str) {
        lock(&self.errors).push(error.to_string());
    }
}

/// Answers every request with the same decision and counts them.
pub struct FixedApprover {
    decision: ApprovalDecision,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl FixedApprover {
    pub fn approving() -> Self {
        Self::new(ApprovalDecision::Approved)
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::new(ApprovalDecision::Rejected {
            reason: reason.to_string(),
        })
    }

    fn new(decision: ApprovalDecision) -> Self {
        Self {
            decision,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ApprovalRequester for FixedApprover {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        lock(&self.requests).push(request);
        Ok(self.decision.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
