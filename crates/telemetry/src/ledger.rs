//! Append-only cost ledger shared by every session using the same resolver.

use crate::TelemetryError;
use chrono::{DateTime, Utc};
use helmsman_core::provider::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// One priced model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub model: String,
    pub cost_usd: f64,
    pub usage: Usage,
    pub timestamp: DateTime<Utc>,
}

/// Token usage summed over the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    entries: Vec<CostEntry>,
    budget_limit: Option<f64>,
}

impl Ledger {
    fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.cost_usd).sum()
    }
}

/// Thread-safe cost tracker.
///
/// Appends and budget reads take the same lock, so concurrent sessions
/// always see a consistent running total.
#[derive(Debug, Default)]
pub struct CostTracker {
    ledger: RwLock<Ledger>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker with a hard spending cap in USD.
    pub fn with_budget(limit: f64) -> Self {
        let tracker = Self::new();
        tracker.set_budget_limit(Some(limit));
        tracker
    }

    pub fn set_budget_limit(&self, limit: Option<f64>) {
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .budget_limit = limit.filter(|l| *l > 0.0);
    }

    pub fn budget_limit(&self) -> Option<f64> {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .budget_limit
    }

    /// Append a priced call to the ledger.
    pub fn record(&self, model: impl Into<String>, cost_usd: f64, usage: Usage) -> CostEntry {
        let entry = CostEntry {
            model: model.into(),
            cost_usd,
            usage,
            timestamp: Utc::now(),
        };
        let mut ledger = self.ledger.write().unwrap_or_else(PoisonError::into_inner);
        ledger.entries.push(entry.clone());

        debug!(
            model = %entry.model,
            cost_usd = entry.cost_usd,
            total_usd = ledger.total(),
            "Cost recorded"
        );
        entry
    }

    pub fn total_cost(&self) -> f64 {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total()
    }

    pub fn cost_by_model(&self) -> BTreeMap<String, f64> {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        let mut by_model = BTreeMap::new();
        for entry in &ledger.entries {
            *by_model.entry(entry.model.clone()).or_insert(0.0) += entry.cost_usd;
        }
        by_model
    }

    pub fn total_tokens(&self) -> TokenTotals {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        ledger
            .entries
            .iter()
            .fold(TokenTotals::default(), |acc, e| TokenTotals {
                input_tokens: acc.input_tokens + e.usage.input_tokens as u64,
                output_tokens: acc.output_tokens + e.usage.output_tokens as u64,
                total_tokens: acc.total_tokens + e.usage.total_tokens as u64,
            })
    }

    /// True when no budget is set, or total spend is still under it.
    pub fn is_within_budget(&self) -> bool {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        match ledger.budget_limit {
            Some(limit) => ledger.total() < limit,
            None => true,
        }
    }

    /// Remaining spend, floored at zero. `None` when no budget is set.
    pub fn remaining_budget(&self) -> Option<f64> {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        ledger
            .budget_limit
            .map(|limit| (limit - ledger.total()).max(0.0))
    }

    /// Fails when the budget is already spent.
    pub fn check_budget(&self) -> Result<(), TelemetryError> {
        let ledger = self.ledger.read().unwrap_or_else(PoisonError::into_inner);
        let Some(limit) = ledger.budget_limit else {
            return Ok(());
        };
        let spent = ledger.total();
        if spent >= limit {
            warn!(spent_usd = spent, limit_usd = limit, "Budget exhausted");
            return Err(TelemetryError::BudgetExceeded(format!(
                "spent ${spent:.4} of ${limit:.4}"
            )));
        }
        Ok(())
    }

    /// Spend recorded at or after `since`.
    pub fn cost_since(&self, since: DateTime<Utc>) -> f64 {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| e.cost_usd)
            .sum()
    }

    pub fn entry_count(&self) -> usize {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Snapshot of the ledger, oldest first.
    pub fn entries(&self) -> Vec<CostEntry> {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }
}
