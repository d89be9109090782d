//! In-memory store: the default memory collaborator for the kernel.
//!
//! Short-term entries are bounded per store; when full, the least important
//! (oldest on ties) are evicted. Long-term, episodic and semantic entries are
//! kept until forgotten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helmsman_config::MemoryConfig;
use helmsman_core::error::MemoryError;
use helmsman_core::memory::{MemoryBackend, MemoryEntry, MemoryKind, MemoryQuery};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::compaction;

#[derive(Debug, Default)]
struct Entries {
    short_term: Vec<MemoryEntry>,
    long_term: Vec<MemoryEntry>,
}

pub struct InMemoryStore {
    entries: RwLock<Entries>,
    short_term_max: usize,
}

impl InMemoryStore {
    pub fn new(short_term_max: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            short_term_max: short_term_max.max(1),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.short_term_max_entries)
    }

    /// Entries held for `subject_id`, optionally only one kind.
    pub async fn count(&self, subject_id: &str, kind: Option<MemoryKind>) -> usize {
        let entries = self.entries.read().await;
        entries
            .short_term
            .iter()
            .chain(entries.long_term.iter())
            .filter(|e| e.subject_id == subject_id && kind.is_none_or(|k| e.kind == k))
            .count()
    }

    /// Short-term entries written during one session, oldest first.
    pub async fn session_entries(&self, subject_id: &str, session_id: &str) -> Vec<MemoryEntry> {
        self.entries
            .read()
            .await
            .short_term
            .iter()
            .filter(|e| {
                e.subject_id == subject_id
                    && e.metadata.get("session_id").and_then(|v| v.as_str()) == Some(session_id)
            })
            .cloned()
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

#[async_trait]
impl MemoryBackend for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn remember(&self, mut entry: MemoryEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();

        debug!(
            id = %id,
            subject_id = %entry.subject_id,
            kind = entry.kind.as_str(),
            importance = entry.importance,
            content_len = entry.content.len(),
            "Memory stored"
        );

        let mut entries = self.entries.write().await;
        if entry.kind == MemoryKind::ShortTerm {
            entries.short_term.push(entry);
            evict(&mut entries.short_term, self.short_term_max);
        } else {
            entries.long_term.push(entry);
        }
        Ok(id)
    }

    async fn recall(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>, MemoryError> {
        let needle = query.text.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        let Entries {
            short_term,
            long_term,
        } = &mut *entries;

        let mut hits: Vec<&mut MemoryEntry> = short_term
            .iter_mut()
            .chain(long_term.iter_mut())
            .filter(|e| query.subject_id.as_deref().is_none_or(|s| e.subject_id == s))
            .filter(|e| query.kind.is_none_or(|k| e.kind == k))
            .filter_map(|e| {
                let score = relevance(e, &needle, now)?;
                e.score = score;
                Some(e)
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.limit);

        Ok(hits
            .into_iter()
            .map(|e| {
                e.last_accessed = now;
                e.clone()
            })
            .collect())
    }

    async fn forget(&self, subject_id: &str, kind: Option<MemoryKind>) -> Result<usize, MemoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.short_term.len() + entries.long_term.len();
        let keep = |e: &MemoryEntry| e.subject_id != subject_id || kind.is_some_and(|k| e.kind != k);
        entries.short_term.retain(keep);
        entries.long_term.retain(keep);
        let removed = before - entries.short_term.len() - entries.long_term.len();

        info!(subject_id, kind = kind.map_or("all", |k| k.as_str()), removed, "Memory cleared");
        Ok(removed)
    }

    async fn compact(&self, subject_id: &str, threshold: usize) -> Result<Option<String>, MemoryError> {
        let mut entries = self.entries.write().await;

        let mut batch: Vec<MemoryEntry> = entries
            .short_term
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect();
        if batch.is_empty() || batch.len() < threshold {
            return Ok(None);
        }
        batch.sort_by_key(|e| e.created_at);

        let summary = compaction::summarize(&batch);
        entries.short_term.retain(|e| e.subject_id != subject_id);
        let mut record = MemoryEntry::new(subject_id, MemoryKind::LongTerm, summary.clone(), 0.8)
            .with_metadata("compacted_from", json!(batch.len()))
            .with_metadata("compacted_at", json!(Utc::now().to_rfc3339()));
        record.id = Uuid::new_v4().to_string();
        entries.long_term.push(record);

        info!(
            subject_id,
            entries_compacted = batch.len(),
            summary_len = summary.len(),
            "Memory compacted"
        );
        Ok(Some(summary))
    }
}

// ── Internal ───────────────────────────────────────────────────

/// Keyword relevance in [0, 1], or `None` when `needle` does not occur.
///
/// position 0.3, frequency 0.3, recency 0.2, importance 0.2.
fn relevance(entry: &MemoryEntry, needle: &str, now: DateTime<Utc>) -> Option<f32> {
    let haystack = entry.content.to_lowercase();
    let first = haystack.find(needle)?;
    let occurrences = haystack.matches(needle).count();

    let position = 1.0 - first as f32 / haystack.len() as f32;
    let frequency = (occurrences as f32 / 5.0).min(1.0);
    let age_hours = (now - entry.created_at).num_milliseconds().max(0) as f32 / 3_600_000.0;
    let recency = 1.0 / (1.0 + age_hours);

    Some(position * 0.3 + frequency * 0.3 + recency * 0.2 + entry.importance * 0.2)
}

fn evict(short_term: &mut Vec<MemoryEntry>, max: usize) {
    while short_term.len() > max {
        let victim = short_term
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.importance
                    .total_cmp(&b.importance)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .map(|(i, _)| i);
        match victim {
            Some(i) => {
                short_term.remove(i);
            }
            None => break,
        }
    }
}
