//! Session manager
//!
//! Owns the persona selection, the single model session bound to it, the
//! conversation log and the pending input. All mutation goes through its
//! methods. State sits behind one lock that is never held across an await,
//! so commands may interleave with a streaming turn.
//!
//! Turn lifecycle: `idle -> pending(thinking) -> pending -> idle`, with an
//! error edge from either pending state back to idle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, ChatSession, OutgoingMessage, SessionSpec, StreamEvent};
use crate::config::VoiceSettings;
use crate::error::{Error, Result};
use crate::persona::{Persona, Roster};
use crate::types::{Citation, ConversationTurn, ImageAttachment};
use crate::voice::{Recognizer, ScreenCapturer, Speaker, Utterance};

use super::events::{Rejection, SessionEvent, SubmitOutcome};

// ─────────────────────────────────────────────────────────────────
// Session slot
// ─────────────────────────────────────────────────────────────────

/// The one live session and the persona it was created for
#[derive(Clone)]
pub enum SessionSlot {
    /// Inactive, or a replacement is being created
    Empty,
    Bound {
        persona_id: String,
        session: Arc<dyn ChatSession>,
    },
    /// Creation failed; not retried until the next persona or activation change
    Failed { persona_id: String },
}

impl SessionSlot {
    pub fn persona_id(&self) -> Option<&str> {
        match self {
            SessionSlot::Empty => None,
            SessionSlot::Bound { persona_id, .. } | SessionSlot::Failed { persona_id } => {
                Some(persona_id)
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, SessionSlot::Bound { .. })
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSlot::Empty => write!(f, "Empty"),
            SessionSlot::Bound { persona_id, .. } => write!(f, "Bound({})", persona_id),
            SessionSlot::Failed { persona_id } => write!(f, "Failed({})", persona_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending { thinking: bool },
}

struct State {
    selected: String,
    active: bool,
    slot: SessionSlot,
    log: Vec<ConversationTurn>,
    input: String,
    attachment: Option<ImageAttachment>,
    phase: Phase,
    listening: bool,
    voice_output: bool,
}

/// What a turn is sent with, fixed at submit time
struct TurnContext {
    session: Arc<dyn ChatSession>,
    persona: Persona,
    apology: String,
}

enum TurnStart {
    Ready {
        context: TurnContext,
        text: String,
        attachment: Option<ImageAttachment>,
    },
    /// The session belongs to a previously selected persona
    Stale,
    Rejected(Rejection),
}

// ─────────────────────────────────────────────────────────────────
// Session Manager
// ─────────────────────────────────────────────────────────────────

pub struct SessionManager {
    roster: Arc<Roster>,
    backend: Arc<dyn ChatBackend>,
    voice: VoiceSettings,
    speaker: Option<Arc<dyn Speaker>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    capturer: Option<Arc<dyn ScreenCapturer>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    state: Mutex<State>,
}

impl SessionManager {
    /// Create an inactive manager with the roster's default persona selected
    pub fn new(roster: Roster, backend: Arc<dyn ChatBackend>) -> Self {
        let voice = VoiceSettings::default();
        let state = State {
            selected: roster.default_persona().id.clone(),
            active: false,
            slot: SessionSlot::Empty,
            log: Vec::new(),
            input: String::new(),
            attachment: None,
            phase: Phase::Idle,
            listening: false,
            voice_output: voice.output_enabled,
        };

        Self {
            roster: Arc::new(roster),
            backend,
            voice,
            speaker: None,
            recognizer: None,
            capturer: None,
            events: None,
            state: Mutex::new(state),
        }
    }

    /// Select the initial persona
    pub fn with_persona(self, persona_id: &str) -> Result<Self> {
        self.roster.require(persona_id)?;
        self.state.lock().selected = persona_id.to_string();
        Ok(self)
    }

    pub fn with_voice_settings(mut self, voice: VoiceSettings) -> Self {
        self.state.lock().voice_output = voice.output_enabled;
        self.voice = voice;
        self
    }

    pub fn with_speaker(mut self, speaker: Arc<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_capturer(mut self, capturer: Arc<dyn ScreenCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Currently selected persona
    pub fn persona(&self) -> Persona {
        let selected = self.state.lock().selected.clone();
        self.lookup(&selected).clone()
    }

    /// Snapshot of the conversation log
    pub fn log(&self) -> Vec<ConversationTurn> {
        self.state.lock().log.clone()
    }

    pub fn slot(&self) -> SessionSlot {
        self.state.lock().slot.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Pending { .. })
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Pending { thinking: true })
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    pub fn input(&self) -> String {
        self.state.lock().input.clone()
    }

    pub fn attachment(&self) -> Option<ImageAttachment> {
        self.state.lock().attachment.clone()
    }

    pub fn voice_output(&self) -> bool {
        self.state.lock().voice_output
    }

    fn lookup(&self, persona_id: &str) -> &Persona {
        self.roster
            .get(persona_id)
            .unwrap_or_else(|| self.roster.default_persona())
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref tx) = self.events {
            // A closed receiver only means nobody is rendering
            let _ = tx.send(event);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Activation & persona selection
    // ─────────────────────────────────────────────────────────────

    /// Activate and bind a session to the selected persona.
    ///
    /// Returns whether a usable session exists afterwards.
    pub async fn activate(&self) -> bool {
        self.state.lock().active = true;
        self.rebuild_session().await
    }

    /// Drop the session. The conversation log is kept.
    pub fn deactivate(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.slot = SessionSlot::Empty;
        info!("Session deactivated");
    }

    /// Switch personas, replacing the session when active.
    ///
    /// Returns `Ok(false)` when `persona_id` is already selected.
    pub async fn select_persona(&self, persona_id: &str) -> Result<bool> {
        self.roster.require(persona_id)?;

        let active = {
            let mut state = self.state.lock();
            if state.selected == persona_id {
                return Ok(false);
            }
            state.selected = persona_id.to_string();
            state.active
        };

        info!(persona = %persona_id, "Persona selected");
        self.emit(SessionEvent::PersonaSelected {
            persona_id: persona_id.to_string(),
        });

        if active {
            self.rebuild_session().await;
        }
        Ok(true)
    }

    /// Discard the current session and create one for the selected persona.
    async fn rebuild_session(&self) -> bool {
        let persona = {
            let mut state = self.state.lock();
            if !state.active {
                return false;
            }
            state.slot = SessionSlot::Empty;
            self.lookup(&state.selected).clone()
        };

        let spec = SessionSpec {
            persona_id: persona.id.clone(),
            system_instruction: self.roster.system_instruction(&persona),
        };

        match self.backend.create_session(spec).await {
            Ok(session) => {
                let greeting = {
                    let mut state = self.state.lock();
                    if !state.active || state.selected != persona.id {
                        debug!(persona = %persona.id, "Selection moved on, dropping new session");
                        return false;
                    }
                    state.slot = SessionSlot::Bound {
                        persona_id: persona.id.clone(),
                        session,
                    };
                    if state.log.is_empty() {
                        let turn = ConversationTurn::assistant(
                            self.roster.greeting_for(&persona),
                            persona.id.clone(),
                            persona.role_label.clone(),
                            Vec::new(),
                        );
                        state.log.push(turn.clone());
                        Some(turn)
                    } else {
                        None
                    }
                };

                info!(persona = %persona.id, backend = self.backend.name(), "Session ready");
                self.emit(SessionEvent::SessionReady {
                    persona_id: persona.id.clone(),
                });
                if let Some(turn) = greeting {
                    self.announce(turn).await;
                }
                true
            }
            Err(e) => {
                warn!(persona = %persona.id, error = %e.format_for_log(), "Failed to create session");
                {
                    let mut state = self.state.lock();
                    if state.active && state.selected == persona.id {
                        state.slot = SessionSlot::Failed {
                            persona_id: persona.id.clone(),
                        };
                    }
                }
                self.emit(SessionEvent::SessionFailed {
                    persona_id: persona.id,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Pending input
    // ─────────────────────────────────────────────────────────────

    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.lock().input = text.clone();
        self.emit(SessionEvent::InputChanged(text));
    }

    /// Replace the pending attachment
    pub fn attach(&self, image: ImageAttachment) {
        debug!(mime = %image.mime_type, bytes = image.data.len(), "Attachment set");
        self.state.lock().attachment = Some(image);
        self.emit(SessionEvent::AttachmentChanged(true));
    }

    /// Load an image file or data URI and make it the pending attachment.
    /// On failure the current attachment is kept.
    pub async fn attach_from(&self, source: &str) -> Result<()> {
        let image = ImageAttachment::load(source).await?;
        self.attach(image);
        Ok(())
    }

    /// Remove the pending attachment. Returns whether one was present.
    pub fn remove_attachment(&self) -> bool {
        let removed = self.state.lock().attachment.take().is_some();
        if removed {
            self.emit(SessionEvent::AttachmentChanged(false));
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────
    // Turn execution
    // ─────────────────────────────────────────────────────────────

    /// Send the pending input as one turn and stream the answer.
    pub async fn submit(&self) -> SubmitOutcome {
        let started = match self.begin_turn() {
            TurnStart::Stale => {
                // The slot is bound to a persona that is no longer selected
                self.rebuild_session().await;
                self.begin_turn()
            }
            other => other,
        };

        let (context, text, attachment) = match started {
            TurnStart::Ready {
                context,
                text,
                attachment,
            } => (context, text, attachment),
            TurnStart::Rejected(rejection) => return SubmitOutcome::Rejected(rejection),
            TurnStart::Stale => return SubmitOutcome::Rejected(Rejection::NoSession),
        };

        let message = self.build_message(&context.persona, text, attachment);
        debug!(persona = %context.persona.id, image = message.has_image(), "Submitting turn");

        let result = self.stream_answer(&context, message).await;

        let (turn, outcome_error) = match result {
            Ok((text, citations)) => (
                ConversationTurn::assistant(
                    text,
                    context.persona.id.clone(),
                    context.persona.role_label.clone(),
                    citations,
                ),
                None,
            ),
            Err(e) => {
                warn!(persona = %context.persona.id, error = %e.format_for_log(), "Turn failed");
                (
                    ConversationTurn::error(context.apology.clone(), context.persona.id.clone()),
                    Some(e),
                )
            }
        };

        let thinking = {
            let mut state = self.state.lock();
            state.log.push(turn.clone());
            let thinking = state.phase == Phase::Pending { thinking: true };
            state.phase = Phase::Idle;
            thinking
        };

        if thinking {
            self.emit(SessionEvent::ThinkingChanged(false));
        }
        self.emit(SessionEvent::PendingChanged(false));
        self.announce(turn.clone()).await;

        match outcome_error {
            None => SubmitOutcome::Completed(turn),
            Some(error) => SubmitOutcome::Failed { turn, error },
        }
    }

    /// Check the submit preconditions and, if they hold, consume the pending
    /// input, append the user turn and enter the pending state.
    fn begin_turn(&self) -> TurnStart {
        let (context, text, attachment, user_turn) = {
            let mut state = self.state.lock();

            if state.phase != Phase::Idle {
                return TurnStart::Rejected(Rejection::TurnInFlight);
            }
            if state.input.trim().is_empty() && state.attachment.is_none() {
                return TurnStart::Rejected(Rejection::EmptyInput);
            }

            let session = match &state.slot {
                SessionSlot::Bound {
                    persona_id,
                    session,
                } if *persona_id == state.selected => Arc::clone(session),
                SessionSlot::Bound { .. } => return TurnStart::Stale,
                _ => return TurnStart::Rejected(Rejection::NoSession),
            };

            let persona = self.lookup(&state.selected).clone();
            let apology = self.roster.apology_for(&persona).to_string();
            let text = std::mem::take(&mut state.input);
            let attachment = state.attachment.take();

            let user_turn = ConversationTurn::user(text.clone(), attachment.clone());
            state.log.push(user_turn.clone());
            state.phase = Phase::Pending { thinking: true };

            let context = TurnContext {
                session,
                persona,
                apology,
            };
            (context, text, attachment, user_turn)
        };

        self.emit(SessionEvent::InputChanged(String::new()));
        if attachment.is_some() {
            self.emit(SessionEvent::AttachmentChanged(false));
        }
        self.emit(SessionEvent::TurnAppended(user_turn));
        self.emit(SessionEvent::PendingChanged(true));
        self.emit(SessionEvent::ThinkingChanged(true));

        TurnStart::Ready {
            context,
            text,
            attachment,
        }
    }

    /// Image first, then text. An image sent without text carries the
    /// persona's fallback prompt when one is configured.
    fn build_message(
        &self,
        persona: &Persona,
        text: String,
        attachment: Option<ImageAttachment>,
    ) -> OutgoingMessage {
        match attachment {
            Some(image) => {
                let text = if text.trim().is_empty() {
                    self.roster
                        .image_prompt_for(persona)
                        .map(str::to_string)
                        .unwrap_or(text)
                } else {
                    text
                };
                OutgoingMessage::with_image(image, text)
            }
            None => OutgoingMessage::text(text),
        }
    }

    /// Drain one response stream into the answer text and its citations.
    async fn stream_answer(
        &self,
        context: &TurnContext,
        message: OutgoingMessage,
    ) -> Result<(String, Vec<Citation>)> {
        let mut stream = context.session.send_stream(message).await?;
        let mut text = String::new();
        let mut citations = Vec::new();

        loop {
            match stream.recv().await {
                Some(StreamEvent::Chunk(chunk)) => {
                    if let Some(fragment) = chunk.text.filter(|t| !t.is_empty()) {
                        let first = {
                            let mut state = self.state.lock();
                            let first = state.phase == Phase::Pending { thinking: true };
                            state.phase = Phase::Pending { thinking: false };
                            first
                        };
                        if first {
                            self.emit(SessionEvent::ThinkingChanged(false));
                        }
                        text.push_str(&fragment);
                        self.emit(SessionEvent::TextDelta(fragment));
                    }
                    for citation in chunk.citations {
                        self.emit(SessionEvent::Citation(citation.clone()));
                        citations.push(citation);
                    }
                }
                Some(StreamEvent::Done) => return Ok((text, citations)),
                Some(StreamEvent::Failed(e)) => return Err(e),
                None => {
                    return Err(Error::stream_interrupted(
                        "stream closed before the answer completed",
                    ))
                }
            }
        }
    }

    /// Publish an appended turn and speak it when appropriate.
    async fn announce(&self, turn: ConversationTurn) {
        let speak = turn.is_assistant() && !turn.is_error && self.voice_output();
        let text = turn.text.clone();
        self.emit(SessionEvent::TurnAppended(turn));

        if !speak {
            return;
        }
        if let Some(ref speaker) = self.speaker {
            if let Err(e) = speaker.speak(Utterance::from_settings(&text, &self.voice)).await {
                warn!(error = %e, "Speech synthesis failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Voice & capture
    // ─────────────────────────────────────────────────────────────

    pub fn set_voice_output(&self, enabled: bool) {
        self.state.lock().voice_output = enabled;
        if !enabled {
            if let Some(ref speaker) = self.speaker {
                speaker.cancel();
            }
        }
        self.emit(SessionEvent::VoiceOutputChanged(enabled));
    }

    /// Wait for the current utterance to finish
    pub async fn finish_speaking(&self) {
        if let Some(ref speaker) = self.speaker {
            if let Err(e) = speaker.wait_idle().await {
                debug!(error = %e, "Speech ended with an error");
            }
        }
    }

    /// Listen for one spoken phrase. A transcript replaces the pending input;
    /// errors and silence only clear the listening flag.
    pub async fn listen(&self) -> Result<Option<String>> {
        let recognizer = self
            .recognizer
            .clone()
            .ok_or(Error::AdapterNotConfigured {
                adapter: "speech recognition",
            })?;

        {
            let mut state = self.state.lock();
            if state.listening {
                return Ok(None);
            }
            state.listening = true;
        }
        self.emit(SessionEvent::ListeningChanged(true));

        let transcript = match recognizer.listen(&self.voice.locale).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "Speech recognition failed");
                None
            }
        };

        {
            let mut state = self.state.lock();
            state.listening = false;
            if let Some(ref text) = transcript {
                state.input = text.clone();
            }
        }
        if let Some(ref text) = transcript {
            self.emit(SessionEvent::InputChanged(text.clone()));
        }
        self.emit(SessionEvent::ListeningChanged(false));

        Ok(transcript)
    }

    /// Capture the screen into the pending attachment. On failure the
    /// attachment is left as it was.
    pub async fn capture_screen(&self) -> Result<()> {
        let capturer = self.capturer.clone().ok_or(Error::AdapterNotConfigured {
            adapter: "screen capture",
        })?;

        match capturer.capture().await {
            Ok(image) => {
                self.attach(image);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Screen capture failed");
                Err(e)
            }
        }
    }
}
