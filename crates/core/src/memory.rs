//! Memory trait: what the kernel needs from the memory subsystem.
//!
//! The loop remembers the task and every action result, and the context
//! assembler recalls entries relevant to the task. Durable storage is the
//! implementation's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// How long-lived a memory is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    ShortTerm,
    LongTerm,
    Episodic,
    Semantic,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::ShortTerm => "short_term",
            MemoryKind::LongTerm => "long_term",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
        }
    }
}

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory (assigned by the backend when empty)
    #[serde(default)]
    pub id: String,

    /// Which subject (agent) the memory belongs to
    pub subject_id: String,

    pub kind: MemoryKind,

    pub content: String,

    /// 0.0 to 1.0
    pub importance: f32,

    /// Session id, action id and similar provenance
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub last_accessed: DateTime<Utc>,

    /// Relevance score (set by recall)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(
        subject_id: impl Into<String>,
        kind: MemoryKind,
        content: impl Into<String>,
        importance: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            subject_id: subject_id.into(),
            kind,
            content: content.into(),
            importance,
            metadata: serde_json::Map::new(),
            created_at: now,
            last_accessed: now,
            score: 0.0,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A recall query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Restrict to one subject's memories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    /// The search text
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Restrict to one kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,
}

fn default_limit() -> usize {
    10
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            subject_id: None,
            text: text.into(),
            limit: default_limit(),
            kind: None,
        }
    }

    pub fn for_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// The memory collaborator.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Store a memory, returning its id.
    async fn remember(&self, entry: MemoryEntry) -> std::result::Result<String, MemoryError>;

    /// Ranked entries relevant to the query, best first.
    async fn recall(&self, query: MemoryQuery) -> std::result::Result<Vec<MemoryEntry>, MemoryError>;

    /// Remove a subject's memories, optionally only one kind. Returns how many were removed.
    async fn forget(
        &self,
        subject_id: &str,
        kind: Option<MemoryKind>,
    ) -> std::result::Result<usize, MemoryError>;

    /// Summarize a subject's short-term memories into one long-term entry
    /// once at least `threshold` have accumulated. Returns the summary when
    /// compaction ran. Backends without compaction keep the default.
    async fn compact(
        &self,
        _subject_id: &str,
        _threshold: usize,
    ) -> std::result::Result<Option<String>, MemoryError> {
        Ok(None)
    }
}
