//! When is a session done?

use helmsman_core::session::LoopStatus;
use std::time::Duration;

use crate::parser::ParsedReply;

#[derive(Debug, Clone, Copy)]
pub struct CompletionDetector {
    complete_on_empty: bool,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CompletionDetector {
    /// `complete_on_empty = false` makes an empty text reply keep the loop going.
    pub fn new(complete_on_empty: bool) -> Self {
        Self { complete_on_empty }
    }

    /// Action batches never complete; text does, unless it is blank and
    /// blank replies are configured not to count.
    pub fn is_complete(&self, parsed: &ParsedReply) -> bool {
        match parsed {
            ParsedReply::Actions { .. } => false,
            ParsedReply::Text { text } => self.complete_on_empty || !text.trim().is_empty(),
        }
    }

    /// The terminal status a resource limit forces, if any.
    pub fn should_stop(
        &self,
        iteration: u32,
        max_iterations: u32,
        elapsed: Duration,
        timeout: Duration,
    ) -> Option<LoopStatus> {
        if iteration >= max_iterations {
            Some(LoopStatus::MaxIterations)
        } else if elapsed > timeout {
            Some(LoopStatus::Timeout)
        } else {
            None
        }
    }
}
