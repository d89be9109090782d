//! Policy gating and human approval for requested actions.
//!
//! The loop asks a [`PolicyGate`] about every requested action before it
//! runs. A gate may allow it, deny it, or send it to an
//! [`ApprovalRequester`] and suspend the session until a decision arrives.
//!
//! [`ApprovalQueue`] is the in-process requester: each request parks on a
//! oneshot channel until [`ApprovalQueue::decide`] is called for its id, the
//! optional timeout rejects it, or the waiting session goes away.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helmsman_config::ApprovalConfig;
use helmsman_core::error::ApprovalError;
use helmsman_core::turn::RequestedAction;
use helmsman_policy::PolicyEnforcer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Policy gate ─────────────────────────────────────────────────────────

/// What the gate is asked about.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub subject_id: &'a str,
    pub session_id: &'a str,
    pub action: &'a RequestedAction,
    pub iteration: u32,
    /// Ledger total across every session
    pub total_cost: f64,
    pub session_cost: f64,
    /// Restrict evaluation to these policies. Empty = all.
    pub policy_ids: &'a [String],
}

impl GateRequest<'_> {
    /// The action's input fields plus session facts, as one flat object.
    /// Session facts win over input fields of the same name.
    pub fn metadata(&self) -> Value {
        let mut fields = match &self.action.input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => Map::from_iter([("input".to_string(), other.clone())]),
        };
        fields.insert("session_id".into(), json!(self.session_id));
        fields.insert("iteration".into(), json!(self.iteration));
        fields.insert("total_cost".into(), json!(self.total_cost));
        fields.insert("session_cost".into(), json!(self.session_cost));
        Value::Object(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Allow,
    /// `reason` is shown to the model verbatim.
    Deny { reason: String },
    RequireApproval { reason: String },
}

/// Decides whether a requested action may run.
///
/// An `Err` is not a denial: it ends the session as errored.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn check(&self, request: &GateRequest<'_>) -> helmsman_core::Result<GateVerdict>;
}

#[async_trait]
impl PolicyGate for PolicyEnforcer {
    async fn check(&self, request: &GateRequest<'_>) -> helmsman_core::Result<GateVerdict> {
        let decision = self.enforce_scoped(
            request.subject_id,
            &request.action.name,
            &request.metadata(),
            request.policy_ids,
        );
        let evaluation = decision.evaluation;

        if evaluation.denied {
            let reason = evaluation.reason.unwrap_or_else(|| "Denied by policy".into());
            warn!(
                subject_id = request.subject_id,
                action = %request.action.name,
                reason = %reason,
                "Action denied by policy"
            );
            Ok(GateVerdict::Deny { reason })
        } else if evaluation.requires_approval {
            let reason = evaluation
                .reason
                .unwrap_or_else(|| "Action requires approval".into());
            info!(
                subject_id = request.subject_id,
                action = %request.action.name,
                reason = %reason,
                "Action requires approval"
            );
            Ok(GateVerdict::RequireApproval { reason })
        } else {
            Ok(GateVerdict::Allow)
        }
    }
}

// ── Approvals ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub subject_id: String,
    pub action_id: String,
    pub action: String,
    pub input: Value,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        session_id: impl Into<String>,
        subject_id: impl Into<String>,
        action: &RequestedAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            subject_id: subject_id.into(),
            action_id: action.id.clone(),
            action: action.name.clone(),
            input: action.input.clone(),
            reason: reason.into(),
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Asks a human whether an action may run. May wait arbitrarily long.
#[async_trait]
pub trait ApprovalRequester: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError>;
}

struct Pending {
    request: ApprovalRequest,
    reply: oneshot::Sender<ApprovalDecision>,
}

/// In-process approval inbox shared by every session of a kernel.
pub struct ApprovalQueue {
    pending: Mutex<HashMap<String, Pending>>,
    announcements: broadcast::Sender<ApprovalRequest>,
    timeout: Option<Duration>,
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ApprovalQueue {
    /// `timeout = None` waits for a decision indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        let (announcements, _) = broadcast::channel(64);
        Self {
            pending: Mutex::new(HashMap::new()),
            announcements,
            timeout,
        }
    }

    /// `timeout_secs = 0` disables the bound.
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new((config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)))
    }

    /// New requests are announced here as they arrive.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announcements.subscribe()
    }

    /// Requests still waiting, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .lock()
            .values()
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver a decision. Returns false when `id` is not pending.
    pub fn decide(&self, id: &str, decision: ApprovalDecision) -> bool {
        let Some(pending) = self.lock().remove(id) else {
            return false;
        };
        info!(
            approval_id = id,
            action = %pending.request.action,
            approved = decision == ApprovalDecision::Approved,
            "Approval decided"
        );
        // The session may have gone away in the meantime.
        pending.reply.send(decision).is_ok()
    }

    pub fn approve(&self, id: &str) -> bool {
        self.decide(id, ApprovalDecision::Approved)
    }

    pub fn reject(&self, id: &str, reason: impl Into<String>) -> bool {
        self.decide(
            id,
            ApprovalDecision::Rejected {
                reason: reason.into(),
            },
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the pending entry however the wait ends.
struct PendingGuard<'a> {
    queue: &'a ApprovalQueue,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.queue.lock().remove(&self.id).is_some() {
            debug!(approval_id = %self.id, "Pending approval withdrawn");
        }
    }
}

#[async_trait]
impl ApprovalRequester for ApprovalQueue {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalDecision, ApprovalError> {
        let id = request.id.clone();
        let (reply, decision) = oneshot::channel();

        self.lock().insert(
            id.clone(),
            Pending {
                request: request.clone(),
                reply,
            },
        );
        let _guard = PendingGuard {
            queue: self,
            id: id.clone(),
        };

        info!(
            approval_id = %id,
            session_id = %request.session_id,
            action = %request.action,
            reason = %request.reason,
            "Awaiting approval"
        );
        // Nobody listening is fine; the request is still listed as pending.
        let _ = self.announcements.send(request);

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, decision).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(approval_id = %id, timeout_secs = limit.as_secs(), "Approval timed out");
                    return Ok(ApprovalDecision::Rejected {
                        reason: format!("Approval timed out after {}s", limit.as_secs()),
                    });
                }
            },
            None => decision.await,
        };

        outcome.map_err(|_| ApprovalError::Cancelled(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_policy::{Operator, Policy, PolicyEngine, PolicyKind, PolicySet};
    use std::sync::Arc;

    fn action(name: &str, input: Value) -> RequestedAction {
        RequestedAction::new(name, input)
    }

    fn gate_request<'a>(action: &'a RequestedAction, policy_ids: &'a [String]) -> GateRequest<'a> {
        GateRequest {
            subject_id: "agent-1",
            session_id: "s-1",
            action,
            iteration: 2,
            total_cost: 1.5,
            session_cost: 0.5,
            policy_ids,
        }
    }

    fn enforcer(policies: Vec<Policy>) -> PolicyEnforcer {
        let engine = PolicyEngine::new(PolicySet { policies }).unwrap();
        PolicyEnforcer::new(Arc::new(engine))
    }

    #[test]
    fn metadata_merges_input_and_session_facts() {
        let act = action("pay", json!({"cost": 60, "total_cost": 999}));
        let meta = gate_request(&act, &[]).metadata();
        assert_eq!(meta["cost"], 60);
        assert_eq!(meta["iteration"], 2);
        assert_eq!(meta["total_cost"], 1.5);
        assert_eq!(meta["session_id"], "s-1");

        let scalar = action("echo", json!("hi"));
        assert_eq!(gate_request(&scalar, &[]).metadata()["input"], "hi");
    }

    #[tokio::test]
    async fn deny_beats_approval() {
        let gate = enforcer(vec![
            Policy::new("spend-cap", PolicyKind::Deny)
                .with_priority(100)
                .with_condition("cost", Operator::Gt, json!(50)),
            Policy::new("review-all", PolicyKind::RequireApproval).with_priority(90),
        ]);

        let expensive = action("pay", json!({"cost": 60}));
        assert_eq!(
            gate.check(&gate_request(&expensive, &[])).await.unwrap(),
            GateVerdict::Deny {
                reason: "Denied by policy: spend-cap".into()
            }
        );

        let cheap = action("pay", json!({"cost": 10}));
        assert_eq!(
            gate.check(&gate_request(&cheap, &[])).await.unwrap(),
            GateVerdict::RequireApproval {
                reason: "Requires approval: review-all".into()
            }
        );
    }

    #[tokio::test]
    async fn no_matching_policy_allows() {
        let gate = enforcer(vec![
            Policy::new("no-deletes", PolicyKind::Deny).with_condition(
                "action",
                Operator::Eq,
                json!("delete"),
            ),
        ]);
        let act = action("search", Value::Null);
        assert_eq!(gate.check(&gate_request(&act, &[])).await.unwrap(), GateVerdict::Allow);
    }

    #[tokio::test]
    async fn queue_delivers_decisions() {
        let queue = Arc::new(ApprovalQueue::default());
        let mut announcements = queue.subscribe();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .request(ApprovalRequest::new("s-1", "agent-1", &action("send_email", Value::Null), "review"))
                    .await
            })
        };

        let announced = announcements.recv().await.unwrap();
        assert_eq!(announced.action, "send_email");
        assert_eq!(queue.pending().len(), 1);

        assert!(queue.approve(&announced.id));
        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalDecision::Approved);
        assert_eq!(queue.pending_count(), 0);

        // Second decision for the same id goes nowhere.
        assert!(!queue.reject(&announced.id, "too late"));
    }

    #[tokio::test]
    async fn rejection_carries_reason() {
        let queue = Arc::new(ApprovalQueue::default());
        let mut announcements = queue.subscribe();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .request(ApprovalRequest::new("s-1", "agent-1", &action("wire", Value::Null), "review"))
                    .await
            })
        };

        let id = announcements.recv().await.unwrap().id;
        queue.reject(&id, "not this week");
        assert_eq!(
            waiter.await.unwrap().unwrap(),
            ApprovalDecision::Rejected {
                reason: "not this week".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_cleans_up() {
        let queue = ApprovalQueue::new(Some(Duration::from_secs(30)));
        let decision = queue
            .request(ApprovalRequest::new("s-1", "agent-1", &action("wire", Value::Null), "review"))
            .await
            .unwrap();

        assert_eq!(
            decision,
            ApprovalDecision::Rejected {
                reason: "Approval timed out after 30s".into()
            }
        );
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_wait_withdraws_request() {
        let queue = Arc::new(ApprovalQueue::default());
        let mut announcements = queue.subscribe();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .request(ApprovalRequest::new("s-1", "agent-1", &action("wire", Value::Null), "review"))
                    .await
            })
        };

        let id = announcements.recv().await.unwrap().id;
        assert_eq!(queue.pending_count(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(queue.pending_count(), 0);
        assert!(!queue.approve(&id));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let queue = ApprovalQueue::from_config(&ApprovalConfig { timeout_secs: 0 });
        assert!(queue.timeout.is_none());
        let queue = ApprovalQueue::from_config(&ApprovalConfig::default());
        assert_eq!(queue.timeout, Some(Duration::from_secs(3600)));
    }
}
