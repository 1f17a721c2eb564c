//! Conversation session
//!
//! The session manager owns everything that changes while the council is
//! running and publishes each change as a `SessionEvent`.

mod events;
mod manager;

pub use events::{Rejection, SessionEvent, SubmitOutcome};
pub use manager::{SessionManager, SessionSlot};
