//! Cost accounting for helmsman.
//!
//! Every model call the resolver makes is priced and appended to a shared,
//! append-only [`CostTracker`] ledger. Totals are derived by summation, and an
//! optional hard budget can stop further spend.

pub mod ledger;
pub mod pricing;

pub use ledger::{CostEntry, CostTracker};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
}
