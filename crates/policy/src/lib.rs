//! Governance policies for agent actions.
//!
//! A policy is a prioritized rule that inspects a proposed action (the
//! subject running it, the action name, and arbitrary metadata such as the
//! action input or the session's spend) and decides whether it may run,
//! must be denied, or needs a human to approve it first.
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ Loop Engine │───▶│ PolicyEngine │───▶│ PolicyEvaluation │
//! │ (action)    │    │  (sorted by  │    │  allowed         │
//! └─────────────┘    │   priority)  │    │  denied          │
//!                    └──────────────┘    │  needs approval  │
//!                                        └─────────────────┘
//! ```
//!
//! # Example policy file
//!
//! ```toml
//! [[policies]]
//! name = "no-large-spend"
//! type = "deny"
//! priority = 100
//! enforcement = "block"
//!
//! [[policies.conditions]]
//! field = "total_cost"
//! op = "gt"
//! value = 50
//! ```

mod condition;
mod enforcement;
mod engine;
mod model;
pub mod templates;

pub use condition::{CompiledConditions, EvalContext};
pub use enforcement::{EnforcementDecision, PolicyEnforcer};
pub use engine::{MatchedPolicy, PolicyEngine, PolicyEvaluation};
pub use model::{
    Condition, EnforcementMode, Operator, Policy, PolicyKind, PolicyScope, PolicySet, PolicyStatus,
};

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Errors from the policy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("invalid condition in policy '{policy}': {detail}")]
    InvalidCondition { policy: String, detail: String },

    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("policy file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
