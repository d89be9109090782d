//! Builds the opening working context of a session and owns the primitives
//! that grow it afterwards.
//!
//! The initial context is, in order:
//!
//! 1. a **system** turn: the instructions, the permitted tool catalogue and
//!    the loop guidelines
//! 2. an optional **system** turn with memories relevant to the task
//! 3. the **user** task
//!
//! Apart from compaction, the `append_*` helpers are the only way the loop
//! changes the context.

use helmsman_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use helmsman_core::provider::ActionDefinition;
use helmsman_core::session::SessionConfig;
use helmsman_core::turn::Turn;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_RECALL_LIMIT: usize = 5;

const GUIDELINES: &[&str] = &[
    "- Think step-by-step before taking action.",
    "- Use tools when you need external information or to perform actions.",
    "- If a tool call fails, consider alternative approaches.",
    "- When the task is complete, provide a clear final response.",
];

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    recall_limit: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_RECALL_LIMIT)
    }
}

impl ContextAssembler {
    pub fn new(recall_limit: usize) -> Self {
        Self { recall_limit }
    }

    /// The catalogue entries `config` is permitted to use, in catalogue order.
    pub fn permitted_actions(
        config: &SessionConfig,
        catalogue: &[ActionDefinition],
    ) -> Vec<ActionDefinition> {
        catalogue
            .iter()
            .filter(|a| config.permits(&a.name))
            .cloned()
            .collect()
    }

    /// Assemble the opening context for `task`.
    ///
    /// A failing memory backend costs the session its recall, nothing more.
    pub async fn assemble_initial(
        &self,
        config: &SessionConfig,
        task: &str,
        memory: Option<&dyn MemoryBackend>,
        catalogue: &[ActionDefinition],
    ) -> Vec<Turn> {
        let mut turns = vec![Turn::system(Self::system_prompt(config, catalogue))];

        if let Some(memory) = memory {
            let query = MemoryQuery::new(task)
                .for_subject(&config.subject_id)
                .limit(self.recall_limit);
            match memory.recall(query).await {
                Ok(entries) if !entries.is_empty() => {
                    debug!(count = entries.len(), "Recalled memories for context");
                    turns.push(Turn::system(Self::format_memories(&entries)));
                }
                Ok(_) => {}
                Err(e) => warn!(subject_id = %config.subject_id, error = %e, "Memory recall failed"),
            }
        }

        turns.push(Turn::user(task));
        turns
    }

    /// Instructions, permitted tools and guidelines, newline-joined.
    pub fn system_prompt(config: &SessionConfig, catalogue: &[ActionDefinition]) -> String {
        let mut parts: Vec<String> = vec![config.instructions.clone()];

        let tools = Self::permitted_actions(config, catalogue);
        if !tools.is_empty() {
            parts.push("\n## Available Tools\n".into());
            for tool in &tools {
                parts.push(format!("- **{}**: {}", tool.name, tool.description));
            }
        }

        parts.push("\n## Guidelines".into());
        parts.extend(GUIDELINES.iter().map(|g| g.to_string()));
        parts.push(format!(
            "- You have a maximum of {} iterations.",
            config.max_iterations
        ));

        parts.join("\n")
    }

    fn format_memories(entries: &[MemoryEntry]) -> String {
        let lines: Vec<String> = entries.iter().map(|e| format!("- {}", e.content)).collect();
        format!("Relevant context from memory:\n{}", lines.join("\n"))
    }

    // ── Append primitives ───────────────────────────────────────────────

    /// Append the result of an action. Strings go in verbatim, anything
    /// else as JSON.
    pub fn append_action_result<T: Serialize>(
        turns: &mut Vec<Turn>,
        action_id: &str,
        action_name: &str,
        result: &T,
    ) {
        let content = match serde_json::to_value(result) {
            Ok(serde_json::Value::String(s)) => s,
            _ => serde_json::to_string(result).unwrap_or_else(|e| {
                format!("{{\"success\":false,\"error\":\"unserializable result: {e}\"}}")
            }),
        };
        turns.push(Turn::action_result(action_id, action_name, content));
    }

    pub fn append_assistant(turns: &mut Vec<Turn>, turn: Turn) {
        turns.push(turn);
    }

    pub fn append_system(turns: &mut Vec<Turn>, content: impl Into<String>) {
        turns.push(Turn::system(content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::memory::MemoryKind;
    use helmsman_core::session::ModelSelection;
    use helmsman_core::tool::ActionOutcome;
    use helmsman_core::turn::Role;
    use helmsman_memory::InMemoryStore;
    use serde_json::json;

    fn config() -> SessionConfig {
        let mut config = SessionConfig::new("agent-1", ModelSelection::new("mock", "mock-model"));
        config.instructions = "You are a careful operator.".into();
        config.max_iterations = 7;
        config
    }

    fn tool(name: &str, description: &str) -> ActionDefinition {
        ActionDefinition {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object"}),
        }
    }

    #[test]
    fn system_prompt_lists_permitted_tools() {
        let mut config = config();
        config.permitted_actions = vec!["search".into()];
        let catalogue = [tool("search", "Search the web"), tool("delete", "Delete a file")];

        let prompt = ContextAssembler::system_prompt(&config, &catalogue);
        assert!(prompt.starts_with("You are a careful operator.\n\n## Available Tools\n"));
        assert!(prompt.contains("- **search**: Search the web"));
        assert!(!prompt.contains("delete"));
        assert!(prompt.ends_with("- You have a maximum of 7 iterations."));
    }

    #[test]
    fn no_tool_section_without_tools() {
        let prompt = ContextAssembler::system_prompt(&config(), &[]);
        assert!(!prompt.contains("Available Tools"));
        assert!(prompt.contains("\n## Guidelines\n- Think step-by-step"));
    }

    #[tokio::test]
    async fn initial_context_without_memory() {
        let turns = ContextAssembler::default()
            .assemble_initial(&config(), "Summarize the report", None, &[])
            .await;

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].content, "Summarize the report");
    }

    #[tokio::test]
    async fn relevant_memories_become_a_system_turn() {
        let store = InMemoryStore::default();
        store
            .remember(MemoryEntry::new("agent-1", MemoryKind::LongTerm, "The report lives in /srv/q3", 0.9))
            .await
            .unwrap();
        store
            .remember(MemoryEntry::new("agent-2", MemoryKind::LongTerm, "Someone else's report", 0.9))
            .await
            .unwrap();

        let turns = ContextAssembler::default()
            .assemble_initial(&config(), "report", Some(&store), &[])
            .await;

        assert_eq!(turns.len(), 3);
        assert_eq!(
            turns[1].content,
            "Relevant context from memory:\n- The report lives in /srv/q3"
        );
    }

    #[tokio::test]
    async fn no_memory_turn_when_nothing_matches() {
        let store = InMemoryStore::default();
        let turns = ContextAssembler::default()
            .assemble_initial(&config(), "anything", Some(&store), &[])
            .await;
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn action_results_are_tagged_and_serialized() {
        let mut turns = Vec::new();
        ContextAssembler::append_action_result(
            &mut turns,
            "act_1",
            "search",
            &ActionOutcome::success(json!({"hits": 2})),
        );
        ContextAssembler::append_action_result(&mut turns, "act_2", "echo", &"plain");

        assert_eq!(turns[0].role, Role::ActionResult);
        assert_eq!(turns[0].action_id.as_deref(), Some("act_1"));
        assert_eq!(turns[0].action_name.as_deref(), Some("search"));
        assert_eq!(turns[0].content, r#"{"success":true,"data":{"hits":2}}"#);
        assert_eq!(turns[1].content, "plain");
    }

    #[test]
    fn append_helpers() {
        let mut turns = Vec::new();
        ContextAssembler::append_system(&mut turns, "note");
        ContextAssembler::append_assistant(&mut turns, Turn::assistant("reply"));
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].role, Role::Assistant);
    }
}
