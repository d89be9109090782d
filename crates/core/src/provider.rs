//! Provider trait: the abstraction over language-model backends.
//!
//! A Provider takes the working context and the permitted action catalogue
//! and returns one normalized [`BackendReply`]. How a concrete backend speaks
//! its own wire protocol is the implementation's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::turn::{RequestedAction, Turn};

/// A single model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,

    /// The working context
    pub turns: Vec<Turn>,

    /// Actions the model may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDefinition>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Credential chosen by the key manager for this call
    #[serde(skip)]
    pub credential: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// An action definition sent to the model so it knows what it can request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,

    /// Description of what the action does
    pub description: String,

    /// JSON Schema describing the action's input
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// Normalized output of a provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendReply {
    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RequestedAction>,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default)]
    pub stop_reason: StopReason,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub latency_ms: u64,
}

impl BackendReply {
    /// A final-text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A reply that requests actions.
    pub fn with_actions(text: impl Into<String>, actions: Vec<RequestedAction>) -> Self {
        Self {
            text: text.into(),
            actions,
            stop_reason: StopReason::ToolUse,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// The core Provider trait.
///
/// The model resolver calls `complete()` without knowing which backend it
/// is talking to.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Models this provider serves. Used to build the resolver's explicit
    /// model-to-provider mapping.
    fn models(&self) -> Vec<String> {
        Vec::new()
    }

    /// Send a request and get a complete reply.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<BackendReply, ProviderError>;

    /// Dollar cost of a call. `None` defers to the resolver's pricing table.
    fn estimate_cost(&self, _usage: &Usage, _model: &str) -> Option<f64> {
        None
    }
}
