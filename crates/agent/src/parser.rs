//! Classifies a backend reply as final text or a batch of requested actions.

use helmsman_core::provider::BackendReply;
use helmsman_core::turn::RequestedAction;

/// A backend reply reduced to what the loop acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    /// No actions requested. May be empty.
    Text { text: String },

    /// One or more actions, in the order the backend returned them.
    Actions {
        text: String,
        actions: Vec<RequestedAction>,
    },
}

impl ParsedReply {
    /// Any reply carrying actions is an action batch, whatever text rides along.
    pub fn parse(reply: &BackendReply) -> Self {
        if reply.actions.is_empty() {
            Self::Text {
                text: reply.text.clone(),
            }
        } else {
            Self::Actions {
                text: reply.text.clone(),
                actions: reply.actions.clone(),
            }
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text { text } | Self::Actions { text, .. } => text,
        }
    }

    pub fn actions(&self) -> &[RequestedAction] {
        match self {
            Self::Text { .. } => &[],
            Self::Actions { actions, .. } => actions,
        }
    }
}
