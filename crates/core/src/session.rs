//! Per-session configuration, lifecycle status, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use crate::tool::ActionOutcome;

/// Unique identifier for one session (one loop run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which backend and model a session talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Preferred provider, tried first when the model has no explicit mapping
    pub provider: String,

    pub model: String,

    /// Unset means [`DEFAULT_TEMPERATURE`], or the kernel's configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// The temperature sent to the backend.
    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Configuration surface of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The agent the session runs as; policies are scoped by this id
    pub subject_id: String,

    /// Action names the agent may see. Empty = the whole catalogue.
    #[serde(default)]
    pub permitted_actions: Vec<String>,

    pub model: ModelSelection,

    /// Instructions placed at the top of the system prompt
    #[serde(default)]
    pub instructions: String,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Context window of the model, in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Wall-clock limit for the whole session
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Restrict policy evaluation to these ids. Empty = every active policy.
    #[serde(default)]
    pub policy_ids: Vec<String>,
}

fn default_max_iterations() -> u32 {
    50
}
fn default_max_tokens() -> usize {
    128_000
}
fn default_timeout_ms() -> u64 {
    300_000
}

impl SessionConfig {
    pub fn new(subject_id: impl Into<String>, model: ModelSelection) -> Self {
        Self {
            subject_id: subject_id.into(),
            permitted_actions: Vec::new(),
            model,
            instructions: String::new(),
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            policy_ids: Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Is `name` in the permitted catalogue?
    pub fn permits(&self, name: &str) -> bool {
        self.permitted_actions.is_empty() || self.permitted_actions.iter().any(|a| a == name)
    }
}

/// Lifecycle state of a loop. `Running` is initial; everything after
/// `Paused` in declaration order is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Running,
    WaitingApproval,
    Paused,
    Completed,
    MaxIterations,
    Timeout,
    Terminated,
    Errored,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            LoopStatus::Running | LoopStatus::WaitingApproval | LoopStatus::Paused
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Running => "running",
            LoopStatus::WaitingApproval => "waiting_approval",
            LoopStatus::Paused => "paused",
            LoopStatus::Completed => "completed",
            LoopStatus::MaxIterations => "max_iterations",
            LoopStatus::Timeout => "timeout",
            LoopStatus::Terminated => "terminated",
            LoopStatus::Errored => "errored",
        }
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the policy gate disposed of a requested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Allowed,
    Denied,
    Rejected,
}

/// One resolved requested action. Never mutated after it is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub output: ActionOutcome,
    pub duration_ms: u64,
    pub disposition: Disposition,
    pub timestamp: DateTime<Utc>,
}

/// What `run(task)` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub subject_id: String,
    /// Final (or last) assistant text; empty when the session errored
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub iterations: u32,
    pub total_tokens: u64,
    /// Dollar cost of this session's model calls
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub status: LoopStatus,
}
