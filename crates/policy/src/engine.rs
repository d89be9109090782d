//! Policy evaluation engine.
//!
//! The engine holds the active policy set and evaluates proposed actions
//! against it. Evaluation is a pure function of the policy set and the
//! context: no clocks, no randomness, no I/O.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::condition::{CompiledConditions, EvalContext};
use crate::model::{EnforcementMode, Policy, PolicyKind, PolicySet};
use crate::{PolicyError, PolicyResult};

/// A policy that matched during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPolicy {
    pub id: String,
    pub name: String,
    pub kind: PolicyKind,
    pub priority: i32,
}

/// The outcome of evaluating the policy set against one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub denied: bool,
    /// Never true when `denied` is.
    pub requires_approval: bool,
    pub reason: Option<String>,
    /// In evaluation order.
    pub matched_policies: Vec<MatchedPolicy>,
}

impl PolicyEvaluation {
    /// Nothing matched.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            denied: false,
            requires_approval: false,
            reason: None,
            matched_policies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledPolicy {
    policy: Policy,
    conditions: CompiledConditions,
}

impl CompiledPolicy {
    fn compile(policy: Policy) -> PolicyResult<Self> {
        policy.validate()?;
        let conditions = CompiledConditions::compile(&policy.name, &policy.conditions)?;
        Ok(Self { policy, conditions })
    }
}

/// Thread-safe policy engine.
///
/// Reads (evaluation) run concurrently; administrative writes are
/// serialized against them by the lock.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    policies: RwLock<Vec<CompiledPolicy>>,
}

impl PolicyEngine {
    /// Create an engine from a policy set. Fails on the first invalid policy.
    pub fn new(set: PolicySet) -> PolicyResult<Self> {
        let compiled = Self::compile_set(set)?;
        Ok(Self {
            policies: RwLock::new(compiled),
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the whole policy set atomically.
    pub fn reload(&self, set: PolicySet) -> PolicyResult<()> {
        let compiled = Self::compile_set(set)?;
        let count = compiled.len();
        *self.policies.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        info!(count, "Policies reloaded");
        Ok(())
    }

    /// Add a policy, assigning an id if it has none. Returns the id.
    pub fn add_policy(&self, mut policy: Policy) -> PolicyResult<String> {
        if policy.id.is_empty() {
            policy.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        policy.created_at = now;
        policy.updated_at = now;

        let id = policy.id.clone();
        let compiled = CompiledPolicy::compile(policy)?;

        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        if policies.iter().any(|p| p.policy.id == id) {
            return Err(PolicyError::InvalidPolicy {
                name: compiled.policy.name,
                reason: format!("duplicate policy id '{id}'"),
            });
        }
        info!(policy_id = %id, name = %compiled.policy.name, "Policy added");
        policies.push(compiled);
        Ok(id)
    }

    /// Remove a policy by id. Returns `true` if found.
    pub fn remove_policy(&self, id: &str) -> bool {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        let before = policies.len();
        policies.retain(|p| p.policy.id != id);
        let removed = policies.len() < before;
        if removed {
            info!(policy_id = %id, "Policy removed");
        }
        removed
    }

    /// Modify a policy in place. It keeps its position (and so its tie order).
    pub fn update_policy(&self, id: &str, apply: impl FnOnce(&mut Policy)) -> PolicyResult<Policy> {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        let slot = policies
            .iter_mut()
            .find(|p| p.policy.id == id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let mut updated = slot.policy.clone();
        apply(&mut updated);
        updated.id = slot.policy.id.clone();
        updated.created_at = slot.policy.created_at;
        updated.updated_at = Utc::now();

        *slot = CompiledPolicy::compile(updated)?;
        info!(policy_id = %id, "Policy updated");
        Ok(slot.policy.clone())
    }

    pub fn get_policy(&self, id: &str) -> Option<Policy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.policy.id == id)
            .map(|p| p.policy.clone())
    }

    /// All policies in insertion order.
    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.policy.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| p.policy.is_active())
            .count()
    }

    /// Evaluate every active policy that applies to `subject_id`.
    pub fn evaluate(
        &self,
        subject_id: &str,
        action: &str,
        metadata: &serde_json::Value,
    ) -> PolicyEvaluation {
        self.evaluate_scoped(subject_id, action, metadata, &[])
    }

    /// Like [`evaluate`](Self::evaluate), restricted to `policy_ids` when non-empty.
    pub fn evaluate_scoped(
        &self,
        subject_id: &str,
        action: &str,
        metadata: &serde_json::Value,
        policy_ids: &[String],
    ) -> PolicyEvaluation {
        let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let ctx = EvalContext::new(subject_id, action, metadata);

        let mut applicable: Vec<&CompiledPolicy> = policies
            .iter()
            .filter(|p| p.policy.is_active() && p.policy.scope.applies_to(subject_id))
            .filter(|p| policy_ids.is_empty() || policy_ids.contains(&p.policy.id))
            .collect();

        // Stable: equal priorities keep insertion order.
        applicable.sort_by(|a, b| b.policy.priority.cmp(&a.policy.priority));

        let mut denied = false;
        let mut requires_approval = false;
        let mut reason: Option<String> = None;
        let mut matched = Vec::new();

        for compiled in applicable {
            if !compiled.conditions.matches(&ctx) {
                continue;
            }
            let policy = &compiled.policy;
            matched.push(MatchedPolicy {
                id: policy.id.clone(),
                name: policy.name.clone(),
                kind: policy.kind,
                priority: policy.priority,
            });

            match policy.kind {
                PolicyKind::Deny => {
                    denied = true;
                    reason = Some(format!("Denied by policy: {}", policy.name));
                    warn!(
                        policy = %policy.name,
                        subject_id,
                        action,
                        enforcement = ?policy.enforcement,
                        "Policy DENIED action"
                    );
                    if policy.enforcement == EnforcementMode::Block {
                        break;
                    }
                }
                PolicyKind::RequireApproval => {
                    requires_approval = true;
                    if !denied {
                        reason = Some(format!("Requires approval: {}", policy.name));
                    }
                    info!(policy = %policy.name, subject_id, action, "Policy requires APPROVAL");
                }
                PolicyKind::Allow | PolicyKind::RateLimit | PolicyKind::Budget => {
                    debug!(
                        policy = %policy.name,
                        kind = policy.kind.as_str(),
                        action,
                        "Policy matched"
                    );
                }
            }
        }

        PolicyEvaluation {
            allowed: !denied,
            denied,
            requires_approval: !denied && requires_approval,
            reason,
            matched_policies: matched,
        }
    }

    // ── Internal ───────────────────────────────────────────────────

    fn compile_set(set: PolicySet) -> PolicyResult<Vec<CompiledPolicy>> {
        let mut compiled = Vec::with_capacity(set.policies.len());
        for mut policy in set.policies {
            if policy.id.is_empty() {
                policy.id = Uuid::new_v4().to_string();
            }
            compiled.push(CompiledPolicy::compile(policy)?);
        }
        Ok(compiled)
    }
}
