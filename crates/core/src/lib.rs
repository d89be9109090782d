//! # helmsman core
//!
//! Domain types, collaborator traits, and error definitions for the helmsman
//! execution kernel. This crate has **no framework dependencies**; it defines
//! the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the kernel is a trait here:
//! - [`Provider`]: a language-model backend
//! - [`ActionExecutor`]: the tool-execution layer
//! - [`MemoryBackend`]: memory recall/remember
//!
//! Implementations live in their respective crates (or in the embedding
//! application), which keeps the dependency graph pointing inward.

pub mod error;
pub mod turn;
pub mod provider;
pub mod tool;
pub mod memory;
pub mod session;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{ApprovalError, Error, MemoryError, ProviderError, Result, ToolError};
pub use turn::{RequestedAction, Role, Turn};
pub use provider::{ActionDefinition, BackendReply, Provider, ProviderRequest, StopReason, Usage};
pub use tool::{ActionExecutor, ActionOutcome, ExecutionScope, Tool, ToolRegistry};
pub use memory::{MemoryBackend, MemoryEntry, MemoryKind, MemoryQuery};
pub use session::{
    ActionRecord, Disposition, LoopStatus, ModelSelection, SessionConfig, SessionId, SessionResult,
};
pub use event::{DomainEvent, EventBus};
