//! Backend trait definitions
//!
//! A `ChatBackend` creates `ChatSession`s. A session is bound to one system
//! instruction for its whole life and keeps its own model-side history.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::{Citation, ImageAttachment};

// ─────────────────────────────────────────────────────────────────
// Outgoing messages
// ─────────────────────────────────────────────────────────────────

/// One part of a user message
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    /// Inline binary image (MIME type + raw bytes)
    Image(ImageAttachment),
    Text(String),
}

/// A user message sent to a session
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub parts: Vec<MessagePart>,
}

impl OutgoingMessage {
    /// Plain text message
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    /// Image followed by its accompanying text
    pub fn with_image(image: ImageAttachment, text: impl Into<String>) -> Self {
        Self {
            parts: vec![MessagePart::Image(image), MessagePart::Text(text.into())],
        }
    }

    /// Concatenated text parts
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text(t) => Some(t.as_str()),
                MessagePart::Image(_) => None,
            })
            .collect()
    }

    pub fn has_image(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, MessagePart::Image(_)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Streaming Support
// ─────────────────────────────────────────────────────────────────

/// One increment of a streamed answer. Either field may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseChunk {
    pub text: Option<String>,
    pub citations: Vec<Citation>,
}

impl ResponseChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            citations: Vec::new(),
        }
    }

    pub fn citations(citations: Vec<Citation>) -> Self {
        Self {
            text: None,
            citations,
        }
    }
}

/// Events delivered on a response stream. A stream that closes without
/// `Done` or `Failed` was interrupted.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(ResponseChunk),
    Done,
    Failed(Error),
}

/// Receiving end of a streamed answer
pub type ResponseStream = mpsc::Receiver<StreamEvent>;

/// Channel capacity used by backends for response streams
pub const STREAM_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────
// Session & Backend Traits
// ─────────────────────────────────────────────────────────────────

/// What a session is bound to at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub persona_id: String,
    pub system_instruction: String,
}

/// A live model conversation with a fixed system instruction
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send one user message and stream the answer back.
    ///
    /// Errors returned here mean the request never started; failures after
    /// that arrive as `StreamEvent::Failed`.
    async fn send_stream(&self, message: OutgoingMessage) -> Result<ResponseStream>;
}

/// Factory for model sessions
///
/// The trait is object-safe so the manager can hold `Arc<dyn ChatBackend>`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name (e.g., "gemini", "scripted")
    fn name(&self) -> &'static str;

    /// Create a new session bound to `spec`
    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn ChatSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_parts() {
        let image = ImageAttachment::png(vec![1, 2, 3]).unwrap();
        let msg = OutgoingMessage::with_image(image.clone(), "mira");
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.parts[0], MessagePart::Image(image));
        assert_eq!(msg.parts[1], MessagePart::Text("mira".to_string()));
        assert!(msg.has_image());
        assert_eq!(msg.text_content(), "mira");
    }

    #[test]
    fn test_text_message() {
        let msg = OutgoingMessage::text("hola");
        assert!(!msg.has_image());
        assert_eq!(msg.text_content(), "hola");
    }
}
