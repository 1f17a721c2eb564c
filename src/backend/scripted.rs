//! Scripted backend for tests and offline runs
//!
//! Replays queued replies fragment by fragment. With nothing queued it echoes
//! the user's text back, which keeps the CLI usable without network access.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::Citation;

use super::{
    ChatBackend, ChatSession, OutgoingMessage, ResponseChunk, ResponseStream, SessionSpec,
    StreamEvent, STREAM_BUFFER,
};

// ─────────────────────────────────────────────────────────────────
// Scripts
// ─────────────────────────────────────────────────────────────────

/// How a scripted reply ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Finish normally
    Complete,
    /// Emit a transport failure after the fragments
    FailMidStream(String),
    /// Refuse the request before any fragment
    RejectRequest(String),
    /// Close the channel without a terminal event
    Drop,
}

/// One queued reply
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub chunks: Vec<ResponseChunk>,
    pub end: ScriptEnd,
    /// When set, the reply waits for this signal before ending
    pub gate: Option<Arc<Notify>>,
}

impl ScriptedReply {
    /// Text fragments in order (empty strings are sent as-is)
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: fragments.into_iter().map(ResponseChunk::text).collect(),
            end: ScriptEnd::Complete,
            gate: None,
        }
    }

    /// Append a chunk carrying only citations
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.chunks.push(ResponseChunk::citations(citations));
        self
    }

    pub fn ending(mut self, end: ScriptEnd) -> Self {
        self.end = end;
        self
    }

    /// Hold the stream open until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Configuration for scripted backend behavior
#[derive(Debug, Clone, Default)]
pub struct ScriptedConfig {
    /// Delay between fragments (ms)
    pub fragment_latency_ms: u64,

    /// Fail every `create_session` call
    pub fail_create_session: bool,
}

// ─────────────────────────────────────────────────────────────────
// Scripted Backend
// ─────────────────────────────────────────────────────────────────

/// Backend replaying queued replies. Cloning shares the queue and the log of
/// recorded requests, so a test can keep a handle after handing one over.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: RwLock<ScriptedConfig>,
    replies: RwLock<VecDeque<ScriptedReply>>,
    sessions: RwLock<Vec<SessionSpec>>,
    sent: RwLock<Vec<SentMessage>>,
}

/// A message as received by a scripted session
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub persona_id: String,
    pub system_instruction: String,
    pub message: OutgoingMessage,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScriptedConfig) -> Self {
        let backend = Self::default();
        *backend.inner.config.write() = config;
        backend
    }

    /// Queue a reply for the next `send_stream`
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.inner.replies.write().push_back(reply);
    }

    pub fn set_fail_create_session(&self, fail: bool) {
        self.inner.config.write().fail_create_session = fail;
    }

    /// Every session created so far, oldest first
    pub fn sessions(&self) -> Vec<SessionSpec> {
        self.inner.sessions.read().clone()
    }

    /// Every message sent so far, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.read().clone()
    }

    fn next_reply(&self, message: &OutgoingMessage) -> ScriptedReply {
        self.inner
            .replies
            .write()
            .pop_front()
            .unwrap_or_else(|| echo_reply(message))
    }
}

/// Default reply: the user's words echoed back one fragment per word
fn echo_reply(message: &OutgoingMessage) -> ScriptedReply {
    let text = message.text_content();
    let mut fragments: Vec<String> = vec!["Eco: ".to_string()];
    if message.has_image() {
        fragments.push("[imagen] ".to_string());
    }
    fragments.extend(text.split_inclusive(' ').map(|w| w.to_string()));
    ScriptedReply::fragments(fragments)
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn ChatSession>> {
        if self.inner.config.read().fail_create_session {
            return Err(Error::SessionCreate {
                persona: spec.persona_id,
                message: "scripted failure".to_string(),
            });
        }

        debug!(persona = %spec.persona_id, "Creating scripted session");
        self.inner.sessions.write().push(spec.clone());

        Ok(Arc::new(ScriptedSession {
            backend: self.clone(),
            spec,
        }))
    }
}

struct ScriptedSession {
    backend: ScriptedBackend,
    spec: SessionSpec,
}

#[async_trait]
impl ChatSession for ScriptedSession {
    async fn send_stream(&self, message: OutgoingMessage) -> Result<ResponseStream> {
        self.backend.inner.sent.write().push(SentMessage {
            persona_id: self.spec.persona_id.clone(),
            system_instruction: self.spec.system_instruction.clone(),
            message: message.clone(),
        });

        let reply = self.backend.next_reply(&message);
        if let ScriptEnd::RejectRequest(ref reason) = reply.end {
            return Err(Error::ConnectionFailed {
                url: "scripted://".to_string(),
                message: reason.clone(),
            });
        }

        let latency = Duration::from_millis(self.backend.inner.config.read().fragment_latency_ms);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            for chunk in reply.chunks {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }

            if let Some(gate) = reply.gate {
                gate.notified().await;
            }

            match reply.end {
                ScriptEnd::Complete => {
                    let _ = tx.send(StreamEvent::Done).await;
                }
                ScriptEnd::FailMidStream(reason) => {
                    let _ = tx
                        .send(StreamEvent::Failed(Error::stream_interrupted(reason)))
                        .await;
                }
                ScriptEnd::Drop | ScriptEnd::RejectRequest(_) => {}
            }
        });

        Ok(rx)
    }
}
