//! Composition root.
//!
//! A [`Kernel`] owns everything sessions share: the credential pool, the
//! cost ledger, the model resolver, the policy engine, the approval queue,
//! the memory store and the event bus. It hands out one [`LoopEngine`] per
//! session, wired to all of them.
//!
//! ```rust,no_run
//! # async fn demo(
//! #     provider: std::sync::Arc<dyn helmsman_core::Provider>,
//! #     tools: std::sync::Arc<dyn helmsman_core::ActionExecutor>,
//! # ) -> Result<(), helmsman_agent::KernelError> {
//! use helmsman_agent::Kernel;
//! use helmsman_config::KernelConfig;
//! use helmsman_core::ModelSelection;
//!
//! let kernel = Kernel::from_config(KernelConfig::load()?)?;
//! kernel.register_provider(provider);
//!
//! let config = kernel.session_config("ops-agent", ModelSelection::new("anthropic", "claude-sonnet-4"));
//! let result = kernel.run(config, tools, "Rotate the staging certificates").await;
//! println!("{}: {}", result.status, result.response);
//! # Ok(())
//! # }
//! ```

use helmsman_config::{ConfigError, KernelConfig};
use helmsman_core::event::EventBus;
use helmsman_core::memory::MemoryBackend;
use helmsman_core::provider::Provider;
use helmsman_core::session::{ModelSelection, SessionConfig, SessionResult};
use helmsman_core::tool::ActionExecutor;
use helmsman_memory::InMemoryStore;
use helmsman_policy::{PolicyEnforcer, PolicyEngine, PolicyError, PolicySet};
use helmsman_providers::{KeyManager, ModelResolver};
use helmsman_telemetry::CostTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::completion::CompletionDetector;
use crate::engine::LoopEngine;
use crate::gate::{ApprovalQueue, ApprovalRequester};
use crate::hooks::EventBusHooks;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

pub struct Kernel {
    config: KernelConfig,
    resolver: Arc<ModelResolver>,
    policies: Arc<PolicyEngine>,
    approvals: Arc<ApprovalQueue>,
    memory: Arc<InMemoryStore>,
    events: Arc<EventBus>,
}

impl Kernel {
    /// Validate `config` and build the shared state it describes.
    /// Providers are registered separately with [`register_provider`](Self::register_provider).
    pub fn from_config(config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;

        let costs = Arc::new(match config.budget.max_usd {
            Some(limit) => CostTracker::with_budget(limit),
            None => CostTracker::new(),
        });
        let keys = Arc::new(KeyManager::from_config(&config.keys));
        let resolver = Arc::new(ModelResolver::new(keys, costs));

        let policies = match &config.policy_file {
            Some(path) => PolicyEngine::new(PolicySet::from_file(path)?)?,
            None => PolicyEngine::empty(),
        };

        let kernel = Self {
            resolver,
            policies: Arc::new(policies),
            approvals: Arc::new(ApprovalQueue::from_config(&config.approval)),
            memory: Arc::new(InMemoryStore::from_config(&config.memory)),
            events: Arc::new(EventBus::default()),
            config,
        };

        info!(
            policies = kernel.policies.active_count(),
            budget_usd = ?kernel.config.budget.max_usd,
            "Kernel ready"
        );
        Ok(kernel)
    }

    /// Register a backend. Credentials, extra models and price overrides
    /// come from the `[[providers]]` entry of the same name, if any.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        match self.config.providers.iter().find(|p| p.name == provider.name()) {
            Some(section) => self.resolver.register_with_config(provider, section),
            None => self.resolver.register(provider, &[]),
        }
    }

    /// A session configuration carrying the kernel's `[session]` defaults.
    /// Temperature and output limit set on `model` are kept.
    pub fn session_config(&self, subject_id: impl Into<String>, model: ModelSelection) -> SessionConfig {
        let defaults = &self.config.session;
        let mut config = SessionConfig::new(
            subject_id,
            ModelSelection {
                temperature: model.temperature.or(Some(defaults.temperature)),
                max_output_tokens: model.max_output_tokens.or(defaults.max_output_tokens),
                ..model
            },
        );
        config.max_iterations = defaults.max_iterations;
        config.max_tokens = defaults.max_tokens;
        config.timeout_ms = defaults.timeout_secs.saturating_mul(1000);
        config
    }

    /// A loop engine for one session, wired to the shared state.
    pub fn session(&self, config: SessionConfig, executor: Arc<dyn ActionExecutor>) -> LoopEngine {
        let defaults = &self.config.session;
        LoopEngine::new(config, Arc::clone(&self.resolver), executor)
            .with_memory(Arc::clone(&self.memory) as Arc<dyn MemoryBackend>)
            .with_policy_gate(Arc::new(PolicyEnforcer::new(Arc::clone(&self.policies))))
            .with_approvals(Arc::clone(&self.approvals) as Arc<dyn ApprovalRequester>)
            .with_hooks(Arc::new(EventBusHooks::new(Arc::clone(&self.events))))
            .with_action_timeout(Duration::from_secs(defaults.action_timeout_secs))
            .with_completion(CompletionDetector::new(defaults.complete_on_empty_reply))
            .with_compaction_threshold(defaults.compaction_threshold)
            .with_recall_limit(defaults.recall_limit)
    }

    /// Run an engine from [`session`](Self::session), then compact the
    /// subject's memory if it has grown past the threshold.
    pub async fn run_session(&self, engine: LoopEngine, task: &str) -> SessionResult {
        let subject_id = engine.config().subject_id.clone();
        let result = engine.run(task).await;
        self.compact_memory(&subject_id).await;
        result
    }

    pub async fn run(
        &self,
        config: SessionConfig,
        executor: Arc<dyn ActionExecutor>,
        task: &str,
    ) -> SessionResult {
        self.run_session(self.session(config, executor), task).await
    }

    /// Summarize the subject's short-term memory once it reaches the
    /// configured threshold. Returns the summary when compaction ran.
    pub async fn compact_memory(&self, subject_id: &str) -> Option<String> {
        match self
            .memory
            .compact(subject_id, self.config.memory.compaction_threshold)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(subject_id, error = %e, "Memory compaction failed");
                None
            }
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        self.resolver.cost_tracker()
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        self.resolver.key_manager()
    }

    pub fn policies(&self) -> &Arc<PolicyEngine> {
        &self.policies
    }

    pub fn approvals(&self) -> &Arc<ApprovalQueue> {
        &self.approvals
    }

    pub fn memory(&self) -> &Arc<InMemoryStore> {
        &self.memory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use helmsman_config::ProviderConfig;
    use helmsman_core::event::DomainEvent;
    use helmsman_core::memory::MemoryKind;
    use helmsman_core::provider::BackendReply;
    use helmsman_core::session::LoopStatus;
    use helmsman_providers::testing::ScriptedProvider;
    use std::io::Write;

    fn kernel(config: KernelConfig) -> Kernel {
        let kernel = Kernel::from_config(config).unwrap();
        kernel.register_provider(Arc::new(
            ScriptedProvider::new("mock").with_repeat(BackendReply::text("Done")),
        ));
        kernel
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = KernelConfig::default();
        config.session.max_iterations = 0;
        assert!(matches!(
            Kernel::from_config(config),
            Err(KernelError::Config(_))
        ));
    }

    #[test]
    fn policies_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[policies]]
name = "no-deletes"
type = "deny"
conditions = [{{ field = "action", op = "eq", value = "delete" }}]
"#
        )
        .unwrap();

        let config = KernelConfig {
            policy_file: Some(file.path().to_path_buf()),
            ..KernelConfig::default()
        };
        let kernel = Kernel::from_config(config).unwrap();
        assert_eq!(kernel.policies().active_count(), 1);
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let config = KernelConfig {
            policy_file: Some("/nonexistent/helmsman/policies.toml".into()),
            ..KernelConfig::default()
        };
        assert!(matches!(
            Kernel::from_config(config),
            Err(KernelError::Policy(_))
        ));
    }

    #[test]
    fn session_config_uses_defaults() {
        let mut config = KernelConfig::default();
        config.session.max_iterations = 9;
        config.session.timeout_secs = 12;
        config.session.temperature = 0.1;
        let kernel = Kernel::from_config(config).unwrap();

        let session = kernel.session_config("agent-1", ModelSelection::new("mock", "mock-model"));
        assert_eq!(session.max_iterations, 9);
        assert_eq!(session.timeout_ms, 12_000);
        assert_eq!(session.model.temperature, Some(0.1));
    }

    #[test]
    fn session_config_keeps_an_explicit_temperature() {
        let mut config = KernelConfig::default();
        config.session.temperature = 0.1;
        let kernel = Kernel::from_config(config).unwrap();

        let model = ModelSelection::new("mock", "mock-model").with_temperature(0.0);
        let session = kernel.session_config("agent-1", model);
        assert_eq!(session.model.temperature, Some(0.0));
    }

    #[test]
    fn provider_sections_supply_credentials() {
        let config = KernelConfig {
            providers: vec![ProviderConfig {
                name: "mock".into(),
                models: vec!["mock-model".into()],
                api_keys: vec!["sk-1".into(), "sk-2".into()],
                pricing: Default::default(),
            }],
            ..KernelConfig::default()
        };
        let kernel = kernel(config);
        assert_eq!(kernel.key_manager().active_key_count("mock"), 2);
        assert_eq!(kernel.resolver().provider_names(), ["mock"]);
    }

    #[tokio::test]
    async fn run_publishes_events() {
        let kernel = kernel(KernelConfig::default());
        let mut events = kernel.events().subscribe();

        let config = kernel.session_config("agent-1", ModelSelection::new("mock", "mock-model"));
        let result = kernel
            .run(config, Arc::new(ScriptedExecutor::new()), "finish up")
            .await;

        assert_eq!(result.status, LoopStatus::Completed);
        assert!(matches!(
            &*events.recv().await.unwrap(),
            DomainEvent::IterationCompleted { iteration: 1, .. }
        ));
        assert!(matches!(
            &*events.recv().await.unwrap(),
            DomainEvent::SessionFinished { status: LoopStatus::Completed, iterations: 1, .. }
        ));
    }

    #[tokio::test]
    async fn memory_compacts_after_threshold() {
        let mut config = KernelConfig::default();
        config.memory.compaction_threshold = 2;
        let kernel = kernel(config);

        let session = kernel.session_config("agent-1", ModelSelection::new("mock", "mock-model"));
        kernel
            .run(session.clone(), Arc::new(ScriptedExecutor::new()), "first task")
            .await;
        // One "Task:" entry is below the threshold.
        assert_eq!(kernel.memory().count("agent-1", Some(MemoryKind::ShortTerm)).await, 1);

        kernel
            .run(session, Arc::new(ScriptedExecutor::new()), "second task")
            .await;
        assert_eq!(kernel.memory().count("agent-1", Some(MemoryKind::ShortTerm)).await, 0);
        assert_eq!(kernel.memory().count("agent-1", Some(MemoryKind::LongTerm)).await, 1);
    }
}
