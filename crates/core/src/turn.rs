//! Turn and requested-action value objects.
//!
//! A session's working context is an ordered sequence of [`Turn`]s. Turns are
//! immutable once appended; only compaction replaces a contiguous middle slice
//! with a synthetic summary turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Instructions, memory context, failure notices
    System,
    /// The task as given by the caller
    User,
    /// A backend reply
    Assistant,
    /// The recorded output of one requested action
    ActionResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ActionResult => "action-result",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured request from a backend reply to invoke a named capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedAction {
    /// Unique id (matches the backend's call id)
    pub id: String,

    /// Name of the capability to invoke
    pub name: String,

    /// Structured input
    #[serde(default)]
    pub input: serde_json::Value,
}

impl RequestedAction {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4().simple()),
            name: name.into(),
            input,
        }
    }
}

/// A single entry in the working context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    pub content: String,

    /// For action-result turns: the requested-action id this turn fulfils
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,

    /// For action-result turns: the action name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,

    /// For assistant turns: the actions the reply requested
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RequestedAction>,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            action_id: None,
            action_name: None,
            actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that carries the actions it requested.
    pub fn assistant_with_actions(content: impl Into<String>, actions: Vec<RequestedAction>) -> Self {
        Self {
            actions,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// An action-result turn tagged with the action id and name it fulfils.
    pub fn action_result(
        action_id: impl Into<String>,
        action_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            action_id: Some(action_id.into()),
            action_name: Some(action_name.into()),
            ..Self::new(Role::ActionResult, content)
        }
    }
}
