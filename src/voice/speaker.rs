//! Text-to-speech
//!
//! Only one utterance plays at a time: starting a new one cancels the
//! previous one.

use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, warn};

use super::{language_of, CommandTemplate};
use crate::config::VoiceSettings;
use crate::error::{Error, Result};

/// Something to say
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
}

impl Utterance {
    /// Utterance for `text` with markup stripped, voiced per `settings`
    pub fn from_settings(text: &str, settings: &VoiceSettings) -> Self {
        Self {
            text: strip_markup(text),
            locale: settings.locale.clone(),
            rate: settings.rate,
            pitch: settings.pitch,
        }
    }

    /// Rate as words per minute, 175 being normal speed
    pub fn words_per_minute(&self) -> u32 {
        (175.0 * self.rate).round() as u32
    }

    /// Pitch on the 0-99 scale used by espeak, 50 being normal
    pub fn pitch_level(&self) -> u32 {
        (50.0 * self.pitch).round().clamp(0.0, 99.0) as u32
    }
}

/// Remove the markdown characters `*`, `#`, `_` and backticks.
pub fn strip_markup(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '#' | '_' | '`'))
        .collect()
}

#[async_trait]
pub trait Speaker: Send + Sync {
    /// Start speaking, cancelling whatever is currently being spoken.
    async fn speak(&self, utterance: Utterance) -> Result<()>;

    /// Stop the current utterance, if any.
    fn cancel(&self);

    /// Wait until the current utterance has finished.
    async fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

/// Speaker running a synthesis command per utterance
pub struct CommandSpeaker {
    template: CommandTemplate,
    current: Mutex<Option<Child>>,
}

impl CommandSpeaker {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            template: CommandTemplate::new("speech synthesis", argv),
            current: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &VoiceSettings) -> Self {
        Self::new(settings.speak_command.clone())
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, utterance: Utterance) -> Result<()> {
        self.cancel();

        if utterance.text.trim().is_empty() {
            return Ok(());
        }

        let rate = utterance.rate.to_string();
        let pitch = utterance.pitch.to_string();
        let wpm = utterance.words_per_minute().to_string();
        let pitch_level = utterance.pitch_level().to_string();
        let vars = [
            ("text", utterance.text.as_str()),
            ("locale", utterance.locale.as_str()),
            ("lang", language_of(&utterance.locale)),
            ("rate", rate.as_str()),
            ("pitch", pitch.as_str()),
            ("wpm", wpm.as_str()),
            ("pitch_level", pitch_level.as_str()),
        ];
        let via_stdin = !self.template.uses("text");

        let mut cmd = self.template.command(&vars)?;
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(if via_stdin { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::adapter_failed(self.template.adapter(), e.to_string()))?;

        if via_stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(utterance.text.as_bytes())
                    .await
                    .map_err(|e| Error::adapter_failed(self.template.adapter(), e.to_string()))?;
            }
        }

        debug!(chars = utterance.text.chars().count(), locale = %utterance.locale, "Speaking");
        *self.current.lock() = Some(child);
        Ok(())
    }

    fn cancel(&self) {
        if let Some(child) = self.current.lock().as_mut() {
            if let Err(e) = child.start_kill() {
                // Already exited
                debug!(error = %e, "Nothing to cancel");
            }
        }
    }

    async fn wait_idle(&self) -> Result<()> {
        let child = self.current.lock().take();
        if let Some(mut child) = child {
            let status = child.wait().await?;
            if !status.success() {
                warn!(status = %status, "Speech command exited with failure");
            }
        }
        Ok(())
    }
}
