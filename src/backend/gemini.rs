//! Gemini streaming backend
//!
//! Talks to the `streamGenerateContent?alt=sse` endpoint. Every session keeps
//! its own history and resends it with each turn, so the hosted model sees the
//! conversation held by that session only.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ModelSettings;
use crate::error::{Error, Result};
use crate::types::Citation;

use super::{
    ChatBackend, ChatSession, MessagePart, OutgoingMessage, ResponseChunk, ResponseStream,
    SessionSpec, StreamEvent, STREAM_BUFFER,
};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Connection settings for the Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API base URL, e.g. "https://generativelanguage.googleapis.com/v1beta"
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub thinking_budget: u32,
    pub search_grounding: bool,
    pub connect_timeout: Duration,
}

impl From<&ModelSettings> for GeminiConfig {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            thinking_budget: settings.thinking_budget,
            search_grounding: settings.search_grounding,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }
}

impl GeminiConfig {
    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────

/// Backend creating Gemini chat sessions
pub struct GeminiBackend {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::AuthenticationFailed {
                message: "no API key configured".to_string(),
            });
        }

        // Only connecting is bounded; answers may stream for as long as they need.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(model = %config.model, url = %config.base_url, "Gemini backend ready");

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn ChatSession>> {
        debug!(persona = %spec.persona_id, "Creating Gemini session");
        Ok(Arc::new(GeminiSession {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            system_instruction: spec.system_instruction,
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

struct GeminiSession {
    client: Client,
    config: Arc<GeminiConfig>,
    system_instruction: String,
    /// Completed exchanges, oldest first
    history: Arc<Mutex<Vec<Content>>>,
}

impl GeminiSession {
    fn build_request(&self, user: Content) -> GenerateContentRequest {
        let mut contents = self.history.lock().clone();
        contents.push(user);

        GenerateContentRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: self.system_instruction.clone(),
                }],
            },
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: self.config.thinking_budget,
                },
            },
            tools: if self.config.search_grounding {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            } else {
                vec![]
            },
        }
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send_stream(&self, message: OutgoingMessage) -> Result<ResponseStream> {
        let user = Content::user(&message);
        let request = self.build_request(user.clone());
        let url = self.config.stream_url();

        debug!(
            url = %url,
            history = request.contents.len() - 1,
            image = message.has_image(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    Error::ConnectionFailed {
                        url: self.config.base_url.clone(),
                        message: e.to_string(),
                    }
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let history = Arc::clone(&self.history);

        tokio::spawn(relay_stream(response.bytes_stream(), user, history, tx));

        Ok(rx)
    }
}

/// Forward a response body as stream events.
///
/// The exchange is committed to `history` only when the body ends cleanly
/// with a non-empty answer; the API rejects model turns without text.
async fn relay_stream<S, B, E>(
    stream: S,
    user: Content,
    history: Arc<Mutex<Vec<Content>>>,
    tx: mpsc::Sender<StreamEvent>,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    tokio::pin!(stream);
    let mut parser = SseParser::default();
    let mut answer = String::new();

    loop {
        let payloads = match stream.next().await {
            Some(Ok(bytes)) => parser.push(bytes.as_ref()),
            Some(Err(e)) => {
                warn!(error = %e, "Response stream broke");
                let _ = tx
                    .send(StreamEvent::Failed(Error::stream_interrupted(e.to_string())))
                    .await;
                return;
            }
            None => parser.finish(),
        };

        for payload in payloads {
            match parse_chunk(&payload) {
                Ok(chunk) => {
                    if let Some(ref text) = chunk.text {
                        answer.push_str(text);
                    }
                    if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                        debug!("Stream receiver dropped");
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(e)).await;
                    return;
                }
            }
        }

        if parser.is_finished() {
            break;
        }
    }

    if answer.is_empty() {
        debug!("Answer had no text; exchange left out of history");
    } else {
        history.lock().extend([user, Content::model(answer)]);
    }
    let _ = tx.send(StreamEvent::Done).await;
}

/// Map a non-success HTTP status to an error, preferring the API's message.
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::AuthenticationFailed { message }
        }
        _ => Error::ApiStatus {
            status: status.as_u16(),
            message,
        },
    }
}

// ─────────────────────────────────────────────────────────────────
// SSE parsing
// ─────────────────────────────────────────────────────────────────

/// Incremental splitter for `data:` lines of a server-sent event stream.
///
/// Works on bytes so multi-byte characters split across network chunks
/// are reassembled before decoding.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseParser {
    /// Feed raw bytes, returning the payloads of all complete `data:` lines.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a trailing line that had no newline.
    fn finish(&mut self) -> Vec<String> {
        self.finished = true;
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).into_iter().collect()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

/// Decode one streamed JSON chunk into text and citations.
fn parse_chunk(payload: &str) -> Result<ResponseChunk> {
    let response: StreamResponse = serde_json::from_str(payload).map_err(|e| Error::ApiMalformed {
        message: format!("invalid stream chunk: {}", e),
    })?;

    if let Some(error) = response.error {
        return Err(Error::ApiStatus {
            status: error.code.unwrap_or(500),
            message: error.message,
        });
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(ResponseChunk::default());
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .collect();

    let citations = candidate
        .grounding_metadata
        .map(|m| m.grounding_chunks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.web)
        .map(|w| Citation::new(w.uri, w.title))
        .collect();

    Ok(ResponseChunk {
        text: if text.is_empty() { None } else { Some(text) },
        citations,
    })
}

// ─────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn user(message: &OutgoingMessage) -> Self {
        let parts = message
            .parts
            .iter()
            .map(|part| match part {
                MessagePart::Image(image) => Part::InlineData {
                    inline_data: InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.base64(),
                    },
                },
                MessagePart::Text(text) => Part::Text { text: text.clone() },
            })
            .collect();
        Self {
            role: "user".to_string(),
            parts,
        }
    }

    fn model(text: String) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::Text { text }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    /// Thought summaries are not part of the answer
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageAttachment;

    fn test_config() -> GeminiConfig {
        GeminiConfig::from(&ModelSettings {
            api_key: "test-key".to_string(),
            base_url: "https://example.test/v1beta/".to_string(),
            ..Default::default()
        })
    }

    fn test_session(search_grounding: bool) -> GeminiSession {
        let mut config = test_config();
        config.search_grounding = search_grounding;
        GeminiSession {
            client: Client::new(),
            config: Arc::new(config),
            system_instruction: "Base\n\nPersona".to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_stream_url() {
        assert_eq!(
            test_config().stream_url(),
            "https://example.test/v1beta/models/gemini-3-flash-preview:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_backend_requires_api_key() {
        let mut config = test_config();
        config.api_key = "  ".to_string();
        assert!(matches!(
            GeminiBackend::new(config),
            Err(Error::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn test_request_shape() {
        let session = test_session(true);
        let request = session.build_request(Content::user(&OutgoingMessage::text("hola")));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Base\n\nPersona");
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 2048);
        assert_eq!(json["tools"][0]["googleSearch"], serde_json::json!({}));
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hola");
    }

    #[test]
    fn test_request_without_grounding_omits_tools() {
        let session = test_session(false);
        let request = session.build_request(Content::user(&OutgoingMessage::text("hola")));
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_image_part_precedes_text() {
        let image = ImageAttachment::png(vec![1, 2, 3]).unwrap();
        let content = Content::user(&OutgoingMessage::with_image(image, "describe"));
        let json = serde_json::to_value(&content).unwrap();

        assert_eq!(json["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["parts"][0]["inlineData"]["data"], "AQID");
        assert_eq!(json["parts"][1]["text"], "describe");
    }

    #[test]
    fn test_history_is_resent() {
        let session = test_session(false);
        session.history.lock().extend([
            Content::user(&OutgoingMessage::text("first")),
            Content::model("answer".to_string()),
        ]);

        let request = session.build_request(Content::user(&OutgoingMessage::text("second")));
        let roles: Vec<&str> = request.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    /// Run `relay_stream` over canned body pieces, returning the events and
    /// the resulting history length.
    async fn relay(
        pieces: Vec<std::result::Result<&'static str, &'static str>>,
    ) -> (Vec<StreamEvent>, usize) {
        let history = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::channel(64);
        let user = Content::user(&OutgoingMessage::text("hola"));

        relay_stream(futures_util::stream::iter(pieces), user, Arc::clone(&history), tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let len = history.lock().len();
        (events, len)
    }

    #[tokio::test]
    async fn test_clean_answer_is_committed() {
        let (events, history) = relay(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hola\"}]}}]}\n"),
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\", viajero.\"}]}}]}"),
        ])
        .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert_eq!(history, 2);
    }

    #[tokio::test]
    async fn test_answer_without_text_is_not_committed() {
        let (events, history) = relay(vec![Ok(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\",\"thought\":true}]}}]}\n",
        )])
        .await;

        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert_eq!(history, 0);
    }

    #[tokio::test]
    async fn test_broken_stream_is_not_committed() {
        let (events, history) = relay(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hola\"}]}}]}\n"),
            Err("connection reset"),
        ])
        .await;

        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(Error::StreamInterrupted { .. }))
        ));
        assert_eq!(history, 0);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_not_committed() {
        let (events, history) = relay(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hola\"}]}}]}\n"),
            Ok("data: not json\n"),
        ])
        .await;

        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(Error::ApiMalformed { .. }))
        ));
        assert_eq!(history, 0);
    }

    #[test]
    fn test_sse_parser_handles_split_lines() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"data: {\"a\":").is_empty());
        let out = parser.push(b"1}\r\n\r\ndata: {\"b\":2}\n");
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_sse_parser_reassembles_utf8() {
        let bytes = "data: {\"t\":\"Sínodo\"}\n".as_bytes();
        let split = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.push(&bytes[..split]).is_empty());
        assert_eq!(parser.push(&bytes[split..]), vec!["{\"t\":\"Sínodo\"}"]);
    }

    #[test]
    fn test_sse_parser_flushes_tail_and_ignores_other_fields() {
        let mut parser = SseParser::default();
        assert!(parser.push(b": keepalive\nevent: message\n").is_empty());
        assert!(parser.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(parser.finish(), vec!["{\"x\":1}"]);
        assert!(parser.is_finished());
    }

    #[test]
    fn test_parse_chunk_text_and_citations() {
        let payload = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "razonando", "thought": true},
                    {"text": "Hola"},
                    {"text": ", viajero."}
                ]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a.example", "title": "A"}},
                    {"retrievedContext": {"uri": "ignored"}},
                    {"web": {"uri": "https://b.example", "title": "B"}}
                ]}
            }]
        }"#;

        let chunk = parse_chunk(payload).unwrap();
        assert_eq!(chunk.text.as_deref(), Some("Hola, viajero."));
        assert_eq!(
            chunk.citations,
            vec![
                Citation::new("https://a.example", "A"),
                Citation::new("https://b.example", "B"),
            ]
        );
    }

    #[test]
    fn test_parse_chunk_without_candidates() {
        let chunk = parse_chunk(r#"{"usageMetadata": {"promptTokenCount": 3}}"#).unwrap();
        assert_eq!(chunk, ResponseChunk::default());
    }

    #[test]
    fn test_parse_chunk_error_and_garbage() {
        let err = parse_chunk(r#"{"error": {"code": 429, "message": "quota"}}"#).unwrap_err();
        assert!(matches!(err, Error::ApiStatus { status: 429, .. }));

        let err = parse_chunk("not json").unwrap_err();
        assert!(matches!(err, Error::ApiMalformed { .. }));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error": {"code": 403, "message": "API key not valid"}}"#;
        match status_error(StatusCode::FORBIDDEN, body) {
            Error::AuthenticationFailed { message } => assert_eq!(message, "API key not valid"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            Error::ApiStatus { status: 503, .. }
        ));
    }
}
