//! Memory for helmsman agents.
//!
//! [`InMemoryStore`] implements `helmsman_core::MemoryBackend` with keyword
//! recall and bounded short-term storage; [`compaction`] folds a subject's
//! short-term memories into a long-term summary.

pub mod compaction;
pub mod in_memory;

pub use in_memory::InMemoryStore;
