//! Type definitions shared across the client
//!
//! Conversation turns, citations and image attachments.

mod attachment;
mod turn;

pub use attachment::*;
pub use turn::*;
