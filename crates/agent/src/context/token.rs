//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Good enough to decide when the working context needs compacting; never
//! used for billing.

use helmsman_core::turn::Turn;

/// Role name and delimiters cost about this much per turn.
const TURN_OVERHEAD: usize = 4;

/// Every reply is primed with an assistant header.
const REPLY_PRIMING: usize = 3;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single turn including per-turn overhead.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    TURN_OVERHEAD + estimate_tokens(&turn.content)
}

/// Estimate tokens for a whole context, including reply priming.
pub fn estimate_context_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum::<usize>() + REPLY_PRIMING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn turn_includes_overhead() {
        assert_eq!(estimate_turn_tokens(&Turn::user("test")), 5);
    }

    #[test]
    fn context_adds_priming() {
        let turns = vec![Turn::system("hello"), Turn::user("test")];
        // (4 + 2) + (4 + 1) + 3
        assert_eq!(estimate_context_tokens(&turns), 14);
        assert_eq!(estimate_context_tokens(&[]), 3);
    }
}
