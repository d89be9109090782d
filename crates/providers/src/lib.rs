//! Model resolution for helmsman.
//!
//! [`ModelResolver`] maps a model id to one of the registered
//! `helmsman_core::Provider`s, fails over between them, picks credentials
//! through the shared [`KeyManager`] and records every call's cost in the
//! shared `CostTracker`.

pub mod keys;
pub mod resolver;
pub mod testing;

pub use keys::{KeyError, KeyManager};
pub use resolver::{ModelResolver, Resolution};
