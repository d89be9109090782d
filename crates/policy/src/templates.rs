//! Ready-made policies for common governance needs.

use serde_json::json;

use crate::model::{EnforcementMode, Operator, Policy, PolicyKind};

/// Deny everything once the session's spend passes `max_usd`.
///
/// Reads the `total_cost` field the loop puts in every evaluation context.
pub fn budget_cap(max_usd: f64) -> Policy {
    Policy::new("budget-cap", PolicyKind::Deny)
        .with_description(format!("Deny actions once spend exceeds ${max_usd:.2}"))
        .with_priority(95)
        .with_enforcement(EnforcementMode::Block)
        .with_condition("total_cost", Operator::Gt, json!(max_usd))
}

/// Deny any action outside `allowed`.
pub fn authority_boundary<I, S>(allowed: I) -> Policy
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
    Policy::new("authority-boundary", PolicyKind::Deny)
        .with_description("Deny actions outside the agent's authority")
        .with_priority(80)
        .with_enforcement(EnforcementMode::Block)
        .with_condition("action", Operator::NotIn, json!(allowed))
}

/// Ask a human before any of `actions` reaches the outside world.
pub fn external_communication<I, S>(actions: I) -> Policy
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let actions: Vec<String> = actions.into_iter().map(Into::into).collect();
    Policy::new("external-communication", PolicyKind::RequireApproval)
        .with_description("Require approval for outbound communication")
        .with_priority(85)
        .with_condition("action", Operator::In, json!(actions))
}

/// Ask a human before touching personal data.
pub fn data_privacy() -> Policy {
    Policy::new("data-privacy", PolicyKind::RequireApproval)
        .with_description("Require approval for actions that handle personal data")
        .with_priority(90)
        .with_condition("action", Operator::Matches, json!("(pii|personal|ssn|credit_card)"))
}
