//! Extractive summaries of accumulated memories.
//!
//! Entries are grouped by kind. The five most important (newest first on
//! ties) of each kind are kept verbatim; the rest collapse into a count and
//! their most frequent terms.

use chrono::Utc;
use helmsman_core::memory::{MemoryEntry, MemoryKind};
use std::collections::HashMap;
use tracing::info;

const KEEP_PER_KIND: usize = 5;
const EXCERPT_CHARS: usize = 200;
const KEY_TERMS: usize = 10;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "been", "were", "they", "their", "will", "would",
    "could", "should", "about", "which", "when", "what", "where", "there", "then", "than", "some",
    "more", "also", "just", "only", "very", "into", "over", "such", "after",
];

/// Summarize `entries` into one markdown document. Empty input gives an empty string.
pub fn summarize(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    // Kinds in order of first appearance.
    let mut groups: Vec<(MemoryKind, Vec<&MemoryEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(kind, _)| *kind == entry.kind) {
            Some((_, group)) => group.push(entry),
            None => groups.push((entry.kind, vec![entry])),
        }
    }

    let sections: Vec<String> = groups
        .into_iter()
        .map(|(kind, mut group)| {
            group.sort_by(|a, b| {
                b.importance
                    .total_cmp(&a.importance)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });

            let split = group.len().min(KEEP_PER_KIND);
            let (top, rest) = group.split_at(split);

            let mut section = format!("## {} Memory\n\n", kind.as_str());
            for entry in top {
                let excerpt: String = entry.content.chars().take(EXCERPT_CHARS).collect();
                section.push_str(&format!("- [{:.1}] {}\n", entry.importance, excerpt));
            }

            if !rest.is_empty() {
                let text = rest
                    .iter()
                    .map(|e| e.content.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                section.push_str(&format!(
                    "\n({} additional entries summarized)\n",
                    rest.len()
                ));
                section.push_str(&format!(
                    "Key topics: {}\n",
                    key_terms(&text, KEY_TERMS).join(", ")
                ));
            }
            section
        })
        .collect();

    let summary = format!(
        "# Memory Summary\n\nCompacted {} entries at {}\n\n{}",
        entries.len(),
        Utc::now().to_rfc3339(),
        sections.join("\n")
    );

    info!(
        original_entries = entries.len(),
        summary_chars = summary.len(),
        "Memory compaction complete"
    );
    summary
}

/// The `count` most frequent words longer than three characters, skipping
/// stopwords. Ties keep first-seen order.
pub fn key_terms(text: &str, count: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut order: Vec<&str> = Vec::new();
    let mut frequency: HashMap<&str, usize> = HashMap::new();

    for word in lower.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.chars().count() <= 3 || STOPWORDS.contains(&word) {
            continue;
        }
        let n = frequency.entry(word).or_insert(0);
        if *n == 0 {
            order.push(word);
        }
        *n += 1;
    }

    order.sort_by(|a, b| frequency[b].cmp(&frequency[a]));
    order.into_iter().take(count).map(str::to_string).collect()
}
