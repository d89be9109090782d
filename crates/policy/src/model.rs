//! Policy data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{PolicyError, PolicyResult};

/// A set of policies loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a TOML string.
    pub fn from_toml(toml_str: &str) -> PolicyResult<Self> {
        let set: PolicySet = toml::from_str(toml_str)?;
        set.validate()?;
        Ok(set)
    }

    /// Load policies from a TOML file.
    pub fn from_file(path: &Path) -> PolicyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn add(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    pub fn validate(&self) -> PolicyResult<()> {
        for policy in &self.policies {
            policy.validate()?;
        }
        Ok(())
    }
}

/// A single governance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Assigned when the policy is added to an engine if left empty.
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type")]
    pub kind: PolicyKind,

    #[serde(default)]
    pub scope: PolicyScope,

    /// All must hold for the policy to match. None = always matches.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub enforcement: EnforcementMode,

    /// Higher is evaluated first. Ties keep insertion order.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub status: PolicyStatus,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            kind,
            scope: PolicyScope::default(),
            conditions: Vec::new(),
            enforcement: EnforcementMode::default(),
            priority: 0,
            status: PolicyStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enforcement(mut self, enforcement: EnforcementMode) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn with_condition(
        mut self,
        field: impl Into<String>,
        op: Operator,
        value: serde_json::Value,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Restrict the policy to the given subjects.
    pub fn for_subjects(mut self, subject_ids: impl IntoIterator<Item = String>) -> Self {
        self.scope = PolicyScope {
            all: false,
            subject_ids: subject_ids.into_iter().collect(),
        };
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.name.is_empty() {
            return Err(PolicyError::InvalidPolicy {
                name: "(empty)".into(),
                reason: "policy name cannot be empty".into(),
            });
        }
        if !self.scope.all && self.scope.subject_ids.is_empty() {
            return Err(PolicyError::InvalidPolicy {
                name: self.name.clone(),
                reason: "scope must apply to all subjects or list at least one".into(),
            });
        }
        crate::condition::CompiledConditions::compile(&self.name, &self.conditions)?;
        Ok(())
    }
}

/// Who a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default = "default_true")]
    pub all: bool,

    #[serde(default)]
    pub subject_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyScope {
    fn default() -> Self {
        Self {
            all: true,
            subject_ids: Vec::new(),
        }
    }
}

impl PolicyScope {
    pub fn applies_to(&self, subject_id: &str) -> bool {
        self.all || self.subject_ids.iter().any(|s| s == subject_id)
    }
}

/// One predicate over the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot path into the context, e.g. `input.path` or `total_cost`.
    pub field: String,
    pub op: Operator,
    /// Ignored by `exists`.
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
    Contains,
    Matches,
    Exists,
}

/// What a matching policy does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Allow,
    Deny,
    RequireApproval,
    /// Matched and reported only; rate limiting lives outside the kernel.
    RateLimit,
    /// Matched and reported only; spend caps are usually `deny` on `total_cost`.
    Budget,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Allow => "allow",
            PolicyKind::Deny => "deny",
            PolicyKind::RequireApproval => "require_approval",
            PolicyKind::RateLimit => "rate_limit",
            PolicyKind::Budget => "budget",
        }
    }
}

/// `Block` stops evaluation at the first matching deny.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    #[default]
    Block,
    Warn,
    Log,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}
