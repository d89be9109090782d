//! Tool execution: the collaborator that actually performs requested actions.
//!
//! The kernel only sees [`ActionExecutor`]. [`ToolRegistry`] is the stock
//! implementation: a name-indexed set of [`Tool`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::ToolError;
use crate::provider::ActionDefinition;

/// Who is executing, passed through to the executor for auditing and sandboxing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionScope {
    pub subject_id: String,
    pub session_id: String,
}

/// The result of executing one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// The tool-execution collaborator.
///
/// Failures are data, not errors: an executor reports a failed outcome and
/// the loop shows it to the model on the next turn.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Definitions of every action this executor can run.
    fn definitions(&self) -> Vec<ActionDefinition>;

    /// Execute one action.
    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        scope: &ExecutionScope,
    ) -> ActionOutcome;
}

/// A single capability that can be registered in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search", "send_email").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        scope: &ExecutionScope,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ActionDefinition {
        ActionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, ordered by name so the catalogue sent to
/// the model is stable between calls.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ActionDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        scope: &ExecutionScope,
    ) -> ActionOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::debug!(tool = %name, "Requested tool is not registered");
            return ActionOutcome::failure("not found");
        };
        match tool.execute(input, scope).await {
            Ok(data) => ActionOutcome::success(data),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                ActionOutcome::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            input: serde_json::Value,
            _scope: &ExecutionScope,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            match input["text"].as_str() {
                Some(text) => Ok(serde_json::json!({ "echo": text })),
                None => Err(ToolError::InvalidArguments("text is required".into())),
            }
        }
    }

    fn scope() -> ExecutionScope {
        ExecutionScope {
            subject_id: "agent-1".into(),
            session_id: "session-1".into(),
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.definitions()[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_executes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let outcome = registry
            .execute("echo", serde_json::json!({"text": "hello world"}), &scope())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()["echo"], "hello world");
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let registry = ToolRegistry::new();
        let outcome = registry.execute("x", serde_json::json!({}), &scope()).await;
        assert_eq!(outcome, ActionOutcome::failure("not found"));
    }

    #[tokio::test]
    async fn tool_error_becomes_failed_outcome() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let outcome = registry.execute("echo", serde_json::json!({}), &scope()).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("text is required"));
    }
}
