//! Interactive terminal front end
//!
//! Lines starting with `/` are commands; anything else is sent as a turn.
//! Turns run on their own task so persona and voice commands stay usable
//! while an answer streams. Session events are rendered on stdout by a
//! separate task; logs go to stderr.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::persona::{Persona, Roster};
use crate::session::{SessionEvent, SessionManager, SubmitOutcome};
use crate::types::{ConversationTurn, Role};

// ─────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────

/// One line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Plain text: set it as the input and send
    Say(String),
    /// Send whatever is pending (transcript and/or attachment)
    Send,
    Persona(String),
    Personas,
    /// `None` toggles
    Voice(Option<bool>),
    Listen,
    Capture,
    Image(String),
    Detach,
    History,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// Parse one input line
pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(body) = line.strip_prefix('/') else {
        return ReplCommand::Say(line.to_string());
    };

    let (name, arg) = match body.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (body, ""),
    };

    match (name.to_lowercase().as_str(), arg) {
        ("persona" | "p", "") => ReplCommand::Personas,
        ("persona" | "p", id) => ReplCommand::Persona(id.to_string()),
        ("personas", _) => ReplCommand::Personas,
        ("voice", "") => ReplCommand::Voice(None),
        ("voice", "on") => ReplCommand::Voice(Some(true)),
        ("voice", "off") => ReplCommand::Voice(Some(false)),
        ("listen" | "l", _) => ReplCommand::Listen,
        ("capture" | "screen", _) => ReplCommand::Capture,
        ("image" | "img", "") => ReplCommand::Unknown(line.to_string()),
        ("image" | "img", source) => ReplCommand::Image(source.to_string()),
        ("detach", _) => ReplCommand::Detach,
        ("send", _) => ReplCommand::Send,
        ("history", _) => ReplCommand::History,
        ("help" | "?", _) => ReplCommand::Help,
        ("quit" | "exit" | "q", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
Commands:
  <text>              Send a message to the selected persona
  /persona <id>       Switch persona (/personas lists them)
  /image <path|uri>   Attach an image file or data URI to the next message
  /capture            Attach a screenshot to the next message
  /detach             Remove the pending attachment
  /listen             Dictate the next message
  /send               Send the pending dictation and/or attachment
  /voice [on|off]     Toggle spoken answers
  /history            Reprint the conversation
  /quit               Leave";

// ─────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────

/// Colour `text` with a 24-bit foreground colour
fn paint(text: &str, rgb: Option<(u8, u8, u8)>, color: bool) -> String {
    match rgb {
        Some((r, g, b)) if color => format!("\x1b[1;38;2;{};{};{}m{}\x1b[0m", r, g, b, text),
        _ => text.to_string(),
    }
}

fn dim(text: &str, color: bool) -> String {
    if color {
        format!("\x1b[2m{}\x1b[0m", text)
    } else {
        text.to_string()
    }
}

/// Turns session events into terminal output
pub struct Renderer {
    roster: Roster,
    color: bool,
    listening: bool,
}

impl Renderer {
    pub fn new(roster: Roster, color: bool) -> Self {
        Self {
            roster,
            color,
            listening: false,
        }
    }

    fn persona(&self, id: Option<&str>) -> Option<&Persona> {
        id.and_then(|id| self.roster.get(id))
    }

    fn header(&self, author: Option<&str>, role_label: Option<&str>) -> String {
        let persona = self.persona(author);
        let label = persona
            .map(|p| p.label.as_str())
            .or(author)
            .unwrap_or("Consejo");
        let mut header = paint(label, persona.and_then(Persona::rgb), self.color);
        if let Some(role) = role_label {
            header.push_str(&dim(&format!(" · {}", role), self.color));
        }
        header
    }

    fn sources(&self, turn: &ConversationTurn) -> String {
        let mut out = String::new();
        if turn.citations().is_empty() {
            return out;
        }
        out.push_str(&dim("Fuentes:", self.color));
        out.push('\n');
        for (i, c) in turn.citations().iter().enumerate() {
            out.push_str(&format!("  [{}] {} <{}>\n", i + 1, c.display_label(), c.uri));
        }
        out
    }

    /// A complete turn, as shown by `/history` and when an answer arrives
    pub fn format_turn(&self, turn: &ConversationTurn) -> String {
        match turn.role {
            Role::User => {
                let mut out = format!("{} {}", dim("tú ›", self.color), turn.text);
                if let Some(ref image) = turn.image {
                    out.push_str(&dim(
                        &format!(" [{} {}]", image.mime_type, image.size_label()),
                        self.color,
                    ));
                }
                out.push('\n');
                out
            }
            Role::Assistant => {
                let mut out = self.header(turn.author.as_deref(), turn.role_label.as_deref());
                out.push('\n');
                if turn.is_error {
                    out.push_str(&paint(&turn.text, Some((0xe0, 0x4f, 0x4f)), self.color));
                } else {
                    out.push_str(&turn.text);
                }
                out.push('\n');
                out.push_str(&self.sources(turn));
                out
            }
        }
    }

    /// Text to write for `event`, if any
    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::ThinkingChanged(true) => Some(dim("pensando…\n", self.color)),
            // Answers are printed once complete so a failed turn never shows partial text
            SessionEvent::TextDelta(_) => None,
            SessionEvent::TurnAppended(turn) if turn.role == Role::User => None,
            SessionEvent::TurnAppended(turn) => Some(format!("{}\n", self.format_turn(turn))),
            SessionEvent::PersonaSelected { persona_id } => {
                let persona = self.persona(Some(persona_id));
                let label = persona.map(|p| p.label.as_str()).unwrap_or(persona_id);
                Some(format!(
                    "» {}\n",
                    paint(label, persona.and_then(Persona::rgb), self.color)
                ))
            }
            SessionEvent::SessionFailed { persona_id, message } => Some(format!(
                "! No se pudo abrir la sesión de {}: {}\n",
                persona_id, message
            )),
            SessionEvent::ListeningChanged(listening) => {
                self.listening = *listening;
                listening.then(|| dim("escuchando…\n", self.color))
            }
            SessionEvent::InputChanged(text) if self.listening && !text.is_empty() => Some(
                format!("{} {}\n{}\n", dim("dictado ›", self.color), text, dim("(/send para enviar)", self.color)),
            ),
            SessionEvent::VoiceOutputChanged(on) => Some(dim(
                if *on { "voz activada\n" } else { "voz desactivada\n" },
                self.color,
            )),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────

fn write_out(text: &str) {
    let mut stdout = std::io::stdout().lock();
    // A closed stdout leaves nothing to report to
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Run the REPL until `/quit`, end of input or Ctrl-C.
pub async fn run(
    manager: Arc<SessionManager>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    color: bool,
) -> Result<()> {
    let mut renderer = Renderer::new(manager.roster().clone(), color);
    let render_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(text) = renderer.render(&event) {
                write_out(&text);
            }
        }
    });

    let roster = manager.roster();
    write_out(&format!(
        "{}\n{}\n\n",
        roster.title,
        dim("Escribe /help para ver los comandos.", color)
    ));

    manager.activate().await;

    let mut turns: Vec<JoinHandle<()>> = Vec::new();
    let mut interrupted = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                None
            }
        };
        let Some(line) = line else { break };

        let command = parse_command(&line);
        debug!(?command, "REPL command");
        turns.retain(|t| !t.is_finished());
        if !handle(&manager, command, color, &mut turns).await {
            break;
        }
    }

    // Let a streaming answer finish unless the user interrupted it
    for turn in turns {
        if interrupted {
            turn.abort();
        } else {
            let _ = turn.await;
        }
    }

    info!("Leaving the council");
    manager.deactivate();
    manager.finish_speaking().await;
    // The renderer drains what is queued and stops once the manager is gone
    drop(manager);
    let _ = render_task.await;
    Ok(())
}

/// Execute one command. Returns `false` to leave the loop.
async fn handle(
    manager: &Arc<SessionManager>,
    command: ReplCommand,
    color: bool,
    turns: &mut Vec<JoinHandle<()>>,
) -> bool {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Quit => return false,
        ReplCommand::Help => write_out(&format!("{}\n", HELP)),
        ReplCommand::Say(text) => {
            manager.set_input(text);
            turns.push(spawn_submit(manager));
        }
        ReplCommand::Send => turns.push(spawn_submit(manager)),
        ReplCommand::Persona(id) => {
            if let Err(e) = manager.select_persona(&id).await {
                eprint!("{}", e.format_for_terminal());
            }
        }
        ReplCommand::Personas => {
            let selected = manager.persona().id;
            let mut out = String::new();
            for p in &manager.roster().personas {
                let marker = if p.id == selected { "*" } else { " " };
                out.push_str(&format!(
                    "{} {:<14} {}  {}\n",
                    marker,
                    p.id,
                    paint(&p.label, p.rgb(), color),
                    dim(&p.description, color)
                ));
            }
            write_out(&out);
        }
        ReplCommand::Voice(setting) => {
            let enabled = setting.unwrap_or(!manager.voice_output());
            manager.set_voice_output(enabled);
        }
        ReplCommand::Listen => {
            if let Err(e) = manager.listen().await {
                eprint!("{}", e.format_for_terminal());
            }
        }
        ReplCommand::Capture => match manager.capture_screen().await {
            Ok(()) => report_attachment(manager, color),
            Err(e) => eprint!("{}", e.format_for_terminal()),
        },
        ReplCommand::Image(source) => match manager.attach_from(&source).await {
            Ok(()) => report_attachment(manager, color),
            Err(e) => eprint!("{}", e.format_for_terminal()),
        },
        ReplCommand::Detach => {
            if manager.remove_attachment() {
                write_out(&dim("imagen descartada\n", color));
            }
        }
        ReplCommand::History => {
            let renderer = Renderer::new(manager.roster().clone(), color);
            let out: String = manager
                .log()
                .iter()
                .map(|t| format!("{}\n", renderer.format_turn(t)))
                .collect();
            write_out(&out);
        }
        ReplCommand::Unknown(line) => {
            eprintln!("Unknown command: {} (try /help)", line);
        }
    }
    true
}

fn report_attachment(manager: &SessionManager, color: bool) {
    if let Some(image) = manager.attachment() {
        write_out(&dim(
            &format!("imagen adjunta: {} {}\n", image.mime_type, image.size_label()),
            color,
        ));
    }
}

fn spawn_submit(manager: &Arc<SessionManager>) -> JoinHandle<()> {
    let manager = Arc::clone(manager);
    tokio::spawn(async move {
        if let SubmitOutcome::Rejected(reason) = manager.submit().await {
            eprintln!("Not sent: {}", reason);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Citation, ImageAttachment};

    fn roster() -> Roster {
        Roster::from_toml(
            r##"
name = "test"
title = "Test Council"
base_instruction = "Base."
default_persona = "a"
greeting = "Hola."
apology = "Lo siento."

[[persona]]
id = "a"
label = "Persona A"
prompt = "A."
color = "#ff8800"

[[persona]]
id = "b"
label = "Persona B"
prompt = "B."
role_label = "Segunda voz"
"##,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(parse_command("  hola  "), ReplCommand::Say("hola".into()));
        assert_eq!(parse_command("   "), ReplCommand::Empty);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/persona galen"), ReplCommand::Persona("galen".into()));
        assert_eq!(parse_command("/p math"), ReplCommand::Persona("math".into()));
        assert_eq!(parse_command("/persona"), ReplCommand::Personas);
        assert_eq!(parse_command("/personas"), ReplCommand::Personas);
        assert_eq!(parse_command("/voice"), ReplCommand::Voice(None));
        assert_eq!(parse_command("/voice on"), ReplCommand::Voice(Some(true)));
        assert_eq!(parse_command("/VOICE off"), ReplCommand::Voice(Some(false)));
        assert_eq!(parse_command("/listen"), ReplCommand::Listen);
        assert_eq!(parse_command("/capture"), ReplCommand::Capture);
        assert_eq!(
            parse_command("/image ~/shot.png"),
            ReplCommand::Image("~/shot.png".into())
        );
        assert_eq!(parse_command("/detach"), ReplCommand::Detach);
        assert_eq!(parse_command("/send"), ReplCommand::Send);
        assert_eq!(parse_command("/history"), ReplCommand::History);
        assert_eq!(parse_command("/help"), ReplCommand::Help);
        assert_eq!(parse_command("/quit"), ReplCommand::Quit);
        assert_eq!(parse_command("/exit"), ReplCommand::Quit);
    }

    #[test]
    fn test_parse_unknown() {
        assert!(matches!(parse_command("/frobnicate"), ReplCommand::Unknown(_)));
        assert!(matches!(parse_command("/voice maybe"), ReplCommand::Unknown(_)));
        assert!(matches!(parse_command("/image"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn test_paint() {
        assert_eq!(paint("x", Some((1, 2, 3)), true), "\x1b[1;38;2;1;2;3mx\x1b[0m");
        assert_eq!(paint("x", Some((1, 2, 3)), false), "x");
        assert_eq!(paint("x", None, true), "x");
    }

    #[test]
    fn test_greeting_rendered_in_full() {
        let mut r = Renderer::new(roster(), false);
        let turn = ConversationTurn::assistant("Hola.", "a", None, Vec::new());
        let out = r.render(&SessionEvent::TurnAppended(turn)).unwrap();
        assert_eq!(out, "Persona A\nHola.\n\n");
    }

    #[test]
    fn test_answer_rendered_once_complete() {
        let mut r = Renderer::new(roster(), false);
        assert_eq!(r.render(&SessionEvent::PendingChanged(true)), None);
        assert!(r
            .render(&SessionEvent::ThinkingChanged(true))
            .unwrap()
            .contains("pensando"));
        assert_eq!(r.render(&SessionEvent::TextDelta("Hola".into())), None);

        let turn = ConversationTurn::assistant(
            "Hola",
            "b",
            Some("Segunda voz".into()),
            vec![Citation::new("https://example.com/page", "Example")],
        );
        r.render(&SessionEvent::PendingChanged(false));
        let out = r.render(&SessionEvent::TurnAppended(turn)).unwrap();
        assert_eq!(out.matches("Hola").count(), 1);
        assert!(out.starts_with("Persona B · Segunda voz\nHola\n"));
        assert!(out.contains("[1] Example <https://example.com/page>"));
    }

    #[test]
    fn test_failed_answer_hides_partial_text() {
        let mut r = Renderer::new(roster(), false);
        let mut out = String::new();
        let events = [
            SessionEvent::PendingChanged(true),
            SessionEvent::ThinkingChanged(true),
            SessionEvent::TextDelta("PARCIAL ".into()),
            SessionEvent::ThinkingChanged(false),
            SessionEvent::TurnAppended(ConversationTurn::error("Lo siento.", "a")),
            SessionEvent::PendingChanged(false),
        ];
        for event in &events {
            if let Some(text) = r.render(event) {
                out.push_str(&text);
            }
        }
        assert!(!out.contains("PARCIAL"));
        assert!(out.contains("Persona A\nLo siento."));
    }

    #[tokio::test]
    async fn test_transport_failure_renders_only_apology() {
        use crate::backend::{ScriptEnd, ScriptedBackend, ScriptedReply};

        let backend = ScriptedBackend::new();
        backend.push_reply(
            ScriptedReply::fragments(["PARCIAL "])
                .ending(ScriptEnd::FailMidStream("connection reset".into())),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(roster(), Arc::new(backend.clone())).with_events(tx);
        assert!(manager.activate().await);
        manager.set_input("hola");
        assert!(!manager.submit().await.is_completed());
        drop(manager);

        let mut r = Renderer::new(roster(), false);
        let mut out = String::new();
        while let Some(event) = rx.recv().await {
            if let Some(text) = r.render(&event) {
                out.push_str(&text);
            }
        }
        assert!(!out.contains("PARCIAL"));
        assert!(out.contains("Lo siento."));
    }

    #[test]
    fn test_user_turns_are_not_echoed() {
        let mut r = Renderer::new(roster(), false);
        let turn = ConversationTurn::user("hola", None);
        assert_eq!(r.render(&SessionEvent::TurnAppended(turn)), None);
    }

    #[test]
    fn test_transcript_shown_only_while_listening() {
        let mut r = Renderer::new(roster(), false);
        assert_eq!(r.render(&SessionEvent::InputChanged("typed".into())), None);

        r.render(&SessionEvent::ListeningChanged(true));
        let out = r.render(&SessionEvent::InputChanged("dictado".into())).unwrap();
        assert!(out.contains("dictado"));
        assert_eq!(r.render(&SessionEvent::ListeningChanged(false)), None);
    }

    #[test]
    fn test_history_format() {
        let r = Renderer::new(roster(), false);
        let image = ImageAttachment::png(vec![0; 2048]).unwrap();
        let out = r.format_turn(&ConversationTurn::user("mira", Some(image)));
        assert!(out.starts_with("tú › mira [image/png"));
    }
}
