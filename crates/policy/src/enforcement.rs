//! The enforcement gate: turns an evaluation into a go/no-go decision.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{PolicyEngine, PolicyEvaluation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementDecision {
    pub evaluation: PolicyEvaluation,
    /// False when the action is denied or must wait for approval.
    pub proceed: bool,
}

/// Shares one engine between every session that gates through it.
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    engine: Arc<PolicyEngine>,
}

impl PolicyEnforcer {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn enforce(
        &self,
        subject_id: &str,
        action: &str,
        metadata: &serde_json::Value,
    ) -> EnforcementDecision {
        self.enforce_scoped(subject_id, action, metadata, &[])
    }

    pub fn enforce_scoped(
        &self,
        subject_id: &str,
        action: &str,
        metadata: &serde_json::Value,
        policy_ids: &[String],
    ) -> EnforcementDecision {
        let evaluation = self
            .engine
            .evaluate_scoped(subject_id, action, metadata, policy_ids);
        let proceed = !evaluation.denied && !evaluation.requires_approval;
        EnforcementDecision {
            evaluation,
            proceed,
        }
    }
}
