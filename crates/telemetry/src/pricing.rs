//! Built-in pricing table for common models.
//!
//! Prices are in USD per 1 million tokens. Provider registrations can
//! override or extend the table at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let prices = HashMap::from([
            // ── Anthropic ──────────────────────────────────────────────
            ("claude-sonnet-4-20250514".to_string(), ModelPricing::new(3.0, 15.0)),
            ("claude-opus-4-5-20250918".to_string(), ModelPricing::new(15.0, 75.0)),
            ("claude-haiku-4-5-20251001".to_string(), ModelPricing::new(0.25, 1.25)),
            // ── OpenAI ─────────────────────────────────────────────────
            ("gpt-4o".to_string(), ModelPricing::new(5.0, 15.0)),
            ("gpt-4o-mini".to_string(), ModelPricing::new(0.15, 0.6)),
            // ── Google ─────────────────────────────────────────────────
            ("gemini-1.5-pro".to_string(), ModelPricing::new(1.25, 5.0)),
            ("gemini-1.5-flash".to_string(), ModelPricing::new(0.075, 0.3)),
        ]);

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    ///
    /// Tries an exact match first, then the name without a provider prefix
    /// (`openai/gpt-4o` → `gpt-4o`), then the longest known name that
    /// prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`).
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return p.cost(input_tokens, output_tokens);
        }

        let bare = model.rsplit('/').next().unwrap_or(model);
        if let Some(p) = prices.get(bare) {
            return p.cost(input_tokens, output_tokens);
        }

        let bare_lower = bare.to_lowercase();
        prices
            .iter()
            .filter(|(key, _)| bare_lower.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// All known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
