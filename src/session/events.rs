//! Notifications published by the session manager

use std::fmt;

use crate::error::Error;
use crate::types::{Citation, ConversationTurn};

/// UI-facing change notifications, in the order the changes happen.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A turn was appended to the conversation log
    TurnAppended(ConversationTurn),
    /// The selected persona changed
    PersonaSelected { persona_id: String },
    /// A session bound to `persona_id` is ready
    SessionReady { persona_id: String },
    /// Creating a session failed; no usable session until the next switch
    SessionFailed { persona_id: String, message: String },
    /// A turn entered (`true`) or left (`false`) the pending state
    PendingChanged(bool),
    /// Still waiting for the first text of the answer
    ThinkingChanged(bool),
    /// A non-empty text fragment of the answer in progress
    TextDelta(String),
    /// A source reported for the answer in progress
    Citation(Citation),
    ListeningChanged(bool),
    /// The pending input text was replaced (e.g. by a transcript)
    InputChanged(String),
    /// A pending attachment was set (`true`) or cleared (`false`)
    AttachmentChanged(bool),
    VoiceOutputChanged(bool),
}

/// Why `submit` did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Neither text nor an attachment is pending
    EmptyInput,
    /// There is no usable session
    NoSession,
    /// Another turn is still streaming
    TurnInFlight,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyInput => write!(f, "nothing to send"),
            Rejection::NoSession => write!(f, "no active session"),
            Rejection::TurnInFlight => write!(f, "still waiting for the previous answer"),
        }
    }
}

/// Result of `submit`
#[derive(Debug)]
pub enum SubmitOutcome {
    /// An answer turn was appended
    Completed(ConversationTurn),
    /// An apology turn was appended in place of the answer
    Failed { turn: ConversationTurn, error: Error },
    /// Nothing happened
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SubmitOutcome::Completed(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            SubmitOutcome::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}
