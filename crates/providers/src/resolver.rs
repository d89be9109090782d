//! Model resolver: maps a model id to a backend and tracks every call.
//!
//! A model with an explicit mapping goes to its provider and nowhere else.
//! Anything else fails over through every registered provider (the caller's
//! preferred one first, then registration order) until one answers.

use helmsman_config::ProviderConfig;
use helmsman_core::error::ProviderError;
use helmsman_core::provider::{BackendReply, Provider, ProviderRequest};
use helmsman_telemetry::{CostTracker, ModelPricing, PricingTable};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::keys::{KeyError, KeyManager};

/// A successful model call.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub reply: BackendReply,
    /// Name of the provider that answered
    pub provider: String,
    /// Dollar cost recorded in the ledger for this call
    pub cost_usd: f64,
}

#[derive(Default)]
struct Registry {
    /// Failover order = registration order.
    providers: Vec<Arc<dyn Provider>>,
    model_to_provider: HashMap<String, String>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }
}

/// Shared by every session; cheap to wrap in an `Arc`.
pub struct ModelResolver {
    registry: RwLock<Registry>,
    keys: Arc<KeyManager>,
    costs: Arc<CostTracker>,
    pricing: PricingTable,
}

impl ModelResolver {
    pub fn new(keys: Arc<KeyManager>, costs: Arc<CostTracker>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            keys,
            costs,
            pricing: PricingTable::with_defaults(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Register a provider with its credentials.
    ///
    /// Every model the provider advertises is mapped to it. Registering a
    /// name twice replaces the provider but keeps its failover position.
    pub fn register(&self, provider: Arc<dyn Provider>, api_keys: &[String]) {
        let name = provider.name().to_string();
        let models = provider.models();

        {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            match registry.providers.iter_mut().find(|p| p.name() == name) {
                Some(slot) => {
                    warn!(provider = %name, "Provider re-registered, replacing");
                    *slot = provider;
                }
                None => registry.providers.push(provider),
            }
            for model in &models {
                registry.model_to_provider.insert(model.clone(), name.clone());
            }
        }

        for key in api_keys {
            self.keys.add_key(&name, key.clone());
        }

        info!(provider = %name, models = ?models, keys = api_keys.len(), "Provider registered");
    }

    /// Register a provider with the extra models and price overrides from its config section.
    pub fn register_with_config(&self, provider: Arc<dyn Provider>, config: &ProviderConfig) {
        let name = provider.name().to_string();
        self.register(provider, &config.api_keys);

        if !config.models.is_empty() {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            for model in &config.models {
                registry.model_to_provider.insert(model.clone(), name.clone());
            }
        }

        for (model, price) in &config.pricing {
            self.pricing
                .set(model.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
        }
    }

    /// Send `request` to a provider and record what it cost.
    ///
    /// Fails with `BudgetExceeded` before any call once the ledger is over
    /// its limit, and with `NoProviderAvailable` when failover runs dry.
    pub async fn resolve(
        &self,
        request: ProviderRequest,
        preferred: Option<&str>,
    ) -> Result<Resolution, ProviderError> {
        self.costs
            .check_budget()
            .map_err(|e| ProviderError::BudgetExceeded(e.to_string()))?;

        let (mapped, candidates) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let mapped = registry
                .model_to_provider
                .get(&request.model)
                .and_then(|name| registry.get(name));

            let mut candidates: Vec<Arc<dyn Provider>> = Vec::with_capacity(registry.providers.len());
            if let Some(first) = preferred.and_then(|name| registry.get(name)) {
                candidates.push(first);
            }
            for provider in &registry.providers {
                if preferred != Some(provider.name()) {
                    candidates.push(Arc::clone(provider));
                }
            }
            (mapped, candidates)
        };

        if let Some(provider) = mapped {
            return self.call_with_tracking(provider.as_ref(), request).await;
        }

        for provider in candidates {
            match self.call_with_tracking(provider.as_ref(), request.clone()).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        model = %request.model,
                        error = %e,
                        "Provider failed, trying next"
                    );
                }
            }
        }

        Err(ProviderError::NoProviderAvailable(request.model))
    }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
    }

    /// Registered provider names in failover order.
    pub fn provider_names(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // ── Internal ───────────────────────────────────────────────────

    async fn call_with_tracking(
        &self,
        provider: &dyn Provider,
        mut request: ProviderRequest,
    ) -> Result<Resolution, ProviderError> {
        let name = provider.name().to_string();
        let key = self.keys.get_key(&name).map_err(|e| match e {
            KeyError::NoActiveKey(_) => ProviderError::NotConfigured(e.to_string()),
            KeyError::AllCoolingDown { retry_after, .. } => ProviderError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            },
        })?;

        let model = request.model.clone();
        request.credential = key.clone();
        let start = Instant::now();

        match provider.complete(request).await {
            Ok(mut reply) => {
                if let Some(key) = &key {
                    self.keys.report_success(&name, key);
                }
                if reply.latency_ms == 0 {
                    reply.latency_ms = start.elapsed().as_millis() as u64;
                }
                if reply.model.is_empty() {
                    reply.model = model.clone();
                }

                let cost_usd = provider
                    .estimate_cost(&reply.usage, &model)
                    .unwrap_or_else(|| {
                        self.pricing.compute_cost(
                            &model,
                            reply.usage.input_tokens,
                            reply.usage.output_tokens,
                        )
                    });
                self.costs.record(model.clone(), cost_usd, reply.usage);

                debug!(
                    provider = %name,
                    model = %model,
                    input_tokens = reply.usage.input_tokens,
                    output_tokens = reply.usage.output_tokens,
                    cost_usd,
                    latency_ms = reply.latency_ms,
                    "Model call completed"
                );

                Ok(Resolution {
                    reply,
                    provider: name,
                    cost_usd,
                })
            }
            Err(e) => {
                if let Some(key) = &key {
                    if matches!(e, ProviderError::AuthenticationFailed(_)) {
                        self.keys.disable_key(&name, key);
                    } else {
                        self.keys.report_error(&name, key);
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use helmsman_config::ExhaustedKeyPolicy;
    use helmsman_core::provider::Usage;
    use helmsman_core::turn::Turn;
    use std::time::Duration;

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest {
            model: model.into(),
            turns: vec![Turn::user("hello")],
            actions: vec![],
            temperature: 0.7,
            max_tokens: None,
            credential: None,
        }
    }

    fn resolver() -> ModelResolver {
        ModelResolver::new(Arc::new(KeyManager::default()), Arc::new(CostTracker::new()))
    }

    #[tokio::test]
    async fn mapped_model_goes_to_its_provider() {
        let resolver = resolver();
        let a = Arc::new(ScriptedProvider::new("a").with_models(["model-a"]));
        let b = Arc::new(ScriptedProvider::new("b").with_models(["model-b"]));
        a.push_ok(BackendReply::text("from a"));
        b.push_ok(BackendReply::text("from b"));
        resolver.register(a.clone(), &[]);
        resolver.register(b.clone(), &[]);

        let res = resolver.resolve(request("model-b"), None).await.unwrap();
        assert_eq!(res.reply.text, "from b");
        assert_eq!(res.provider, "b");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn mapped_failure_does_not_fail_over() {
        let resolver = resolver();
        let a = Arc::new(ScriptedProvider::new("a").with_models(["model-a"]));
        let b = Arc::new(ScriptedProvider::new("b"));
        a.push_err(ProviderError::Network("down".into()));
        b.push_ok(BackendReply::text("from b"));
        resolver.register(a, &[]);
        resolver.register(b.clone(), &[]);

        let err = resolver.resolve(request("model-a"), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn unmapped_model_fails_over_in_order() {
        let resolver = resolver();
        let a = Arc::new(ScriptedProvider::new("a"));
        let b = Arc::new(ScriptedProvider::new("b"));
        a.push_err(ProviderError::Timeout("slow".into()));
        b.push_ok(BackendReply::text("from b").with_usage(Usage::new(10, 5)));
        resolver.register(a.clone(), &[]);
        resolver.register(b.clone(), &[]);

        let res = resolver.resolve(request("anything"), None).await.unwrap();
        assert_eq!(res.provider, "b");
        assert_eq!(a.calls(), 1);
        assert_eq!(resolver.cost_tracker().entry_count(), 1);
    }

    #[tokio::test]
    async fn preferred_provider_is_tried_first() {
        let resolver = resolver();
        let a = Arc::new(ScriptedProvider::new("a"));
        let b = Arc::new(ScriptedProvider::new("b"));
        a.push_ok(BackendReply::text("from a"));
        b.push_ok(BackendReply::text("from b"));
        resolver.register(a.clone(), &[]);
        resolver.register(b, &[]);

        let res = resolver.resolve(request("anything"), Some("b")).await.unwrap();
        assert_eq!(res.provider, "b");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn all_failing_is_no_provider_available() {
        let resolver = resolver();
        let a = Arc::new(ScriptedProvider::new("a"));
        a.push_err(ProviderError::Network("down".into()));
        resolver.register(a, &[]);

        let err = resolver.resolve(request("gpt-x"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "No provider available for model: gpt-x");

        let empty = self::resolver();
        assert!(matches!(
            empty.resolve(request("gpt-x"), None).await,
            Err(ProviderError::NoProviderAvailable(_))
        ));
    }

    #[tokio::test]
    async fn cost_comes_from_pricing_table() {
        let resolver = resolver();
        let p = Arc::new(ScriptedProvider::new("anthropic"));
        p.push_ok(BackendReply::text("ok").with_usage(Usage::new(1000, 500)));
        resolver.register(p, &[]);

        let res = resolver
            .resolve(request("claude-sonnet-4-20250514"), None)
            .await
            .unwrap();
        assert!((res.cost_usd - 0.0105).abs() < 1e-10);
        assert!((resolver.cost_tracker().total_cost() - 0.0105).abs() < 1e-10);
        assert_eq!(res.reply.model, "claude-sonnet-4-20250514");
    }

    #[tokio::test]
    async fn provider_priced_calls_win() {
        let resolver = resolver();
        let p = Arc::new(ScriptedProvider::new("p").with_flat_cost(0.5));
        p.push_ok(BackendReply::text("ok").with_usage(Usage::new(1, 1)));
        resolver.register(p, &[]);

        let res = resolver.resolve(request("gpt-4o"), None).await.unwrap();
        assert!((res.cost_usd - 0.5).abs() < 1e-10);
    }

    #[tokio::test]
    async fn config_adds_models_and_prices() {
        let resolver = resolver();
        let p = Arc::new(ScriptedProvider::new("custom"));
        let other = Arc::new(ScriptedProvider::new("other"));
        p.push_ok(BackendReply::text("ok").with_usage(Usage::new(1_000_000, 0)));
        resolver.register(other.clone(), &[]);

        let config: ProviderConfig = toml::from_str(
            r#"
name = "custom"
models = ["house-model"]
api_keys = ["sk-1"]

[pricing.house-model]
input_per_m = 2.0
output_per_m = 4.0
"#,
        )
        .unwrap();
        resolver.register_with_config(p.clone(), &config);

        let res = resolver.resolve(request("house-model"), None).await.unwrap();
        assert_eq!(res.provider, "custom");
        assert_eq!(other.calls(), 0);
        assert!((res.cost_usd - 2.0).abs() < 1e-10);
        assert_eq!(p.last_credential().as_deref(), Some("sk-1"));
    }

    #[tokio::test]
    async fn budget_exhaustion_blocks_calls() {
        let costs = Arc::new(CostTracker::with_budget(0.01));
        let resolver = ModelResolver::new(Arc::new(KeyManager::default()), costs.clone());
        let p = Arc::new(ScriptedProvider::new("p"));
        p.push_ok(BackendReply::text("ok"));
        resolver.register(p.clone(), &[]);

        costs.record("earlier", 0.02, Usage::default());
        let err = resolver.resolve(request("m"), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::BudgetExceeded(_)));
        assert_eq!(p.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_rotate_credentials() {
        let keys = Arc::new(KeyManager::new(
            Duration::from_secs(60),
            3,
            ExhaustedKeyPolicy::SoonestExpiry,
        ));
        let resolver = ModelResolver::new(keys.clone(), Arc::new(CostTracker::new()));
        let p = Arc::new(ScriptedProvider::new("p").with_models(["m"]));
        resolver.register(p.clone(), &["k1".to_string(), "k2".to_string()]);

        for _ in 0..3 {
            p.push_err(ProviderError::RateLimited { retry_after_secs: 1 });
            let _ = resolver.resolve(request("m"), None).await;
        }
        assert_eq!(p.last_credential().as_deref(), Some("k1"));

        p.push_ok(BackendReply::text("ok"));
        resolver.resolve(request("m"), None).await.unwrap();
        assert_eq!(p.last_credential().as_deref(), Some("k2"));
    }

    #[tokio::test]
    async fn auth_failure_disables_credential() {
        let resolver = resolver();
        let p = Arc::new(ScriptedProvider::new("p").with_models(["m"]));
        resolver.register(p.clone(), &["bad".to_string(), "good".to_string()]);

        p.push_err(ProviderError::AuthenticationFailed("revoked".into()));
        let _ = resolver.resolve(request("m"), None).await;
        assert_eq!(resolver.key_manager().active_key_count("p"), 1);

        p.push_ok(BackendReply::text("ok"));
        resolver.resolve(request("m"), None).await.unwrap();
        assert_eq!(p.last_credential().as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn re_registration_keeps_position() {
        let resolver = resolver();
        resolver.register(Arc::new(ScriptedProvider::new("a")), &[]);
        resolver.register(Arc::new(ScriptedProvider::new("b")), &[]);
        resolver.register(Arc::new(ScriptedProvider::new("a")), &[]);
        assert_eq!(resolver.provider_names(), ["a", "b"]);
        assert!(resolver.provider("a").is_some());
    }
}
