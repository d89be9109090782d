//! Keeps the working context under the model's window.
//!
//! Once the estimate passes `threshold` of `max_tokens`, everything between
//! the first turn and the last [`KEEP_LAST`] turns is replaced by one
//! synthetic system turn listing a truncated line per dropped turn.

use helmsman_core::turn::Turn;
use tracing::info;

use crate::context::token;

/// Fraction of the window at which compaction kicks in.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.8;

/// Turns kept verbatim at the tail.
pub const KEEP_LAST: usize = 4;

const SUMMARY_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ContextGuard {
    max_tokens: usize,
    threshold: f64,
}

impl ContextGuard {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn exceeds_budget(&self, turns: &[Turn]) -> bool {
        token::estimate_context_tokens(turns) as f64 > self.max_tokens as f64 * self.threshold
    }

    /// Estimated share of the window in use; above 1.0 means overflow.
    pub fn utilization(&self, turns: &[Turn]) -> f64 {
        if self.max_tokens == 0 {
            return f64::INFINITY;
        }
        token::estimate_context_tokens(turns) as f64 / self.max_tokens as f64
    }

    pub fn token_count(&self, turns: &[Turn]) -> usize {
        token::estimate_context_tokens(turns)
    }

    /// Negative once the window is overrun.
    pub fn remaining_tokens(&self, turns: &[Turn]) -> i64 {
        self.max_tokens as i64 - token::estimate_context_tokens(turns) as i64
    }

    /// Keep the first turn and the last [`KEEP_LAST`], summarizing the rest.
    /// Contexts too short to have a middle come back unchanged.
    pub fn compact(&self, turns: Vec<Turn>) -> Vec<Turn> {
        if turns.len() <= KEEP_LAST + 1 {
            return turns;
        }

        let before = token::estimate_context_tokens(&turns);
        let tail_start = turns.len() - KEEP_LAST;
        let mut turns = turns.into_iter();
        let Some(first) = turns.next() else {
            return Vec::new();
        };
        let middle: Vec<Turn> = turns.by_ref().take(tail_start - 1).collect();
        let tail: Vec<Turn> = turns.collect();

        let lines: Vec<String> = middle
            .iter()
            .map(|t| {
                let excerpt: String = t.content.chars().take(SUMMARY_EXCERPT_CHARS).collect();
                format!("[{}]: {}...", t.role.as_str(), excerpt)
            })
            .collect();
        let summary = format!(
            "[Previous conversation summary ({} messages):\n{}\n]",
            middle.len(),
            lines.join("\n")
        );

        let mut compacted = Vec::with_capacity(KEEP_LAST + 2);
        compacted.push(first);
        compacted.push(Turn::system(summary));
        compacted.extend(tail);

        info!(
            tokens_before = before,
            tokens_after = token::estimate_context_tokens(&compacted),
            turns_summarized = middle.len(),
            "Working context compacted"
        );
        compacted
    }
}
