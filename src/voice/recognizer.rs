//! Speech-to-text: single-shot recognition in a fixed locale.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use super::{language_of, CommandTemplate};
use crate::config::VoiceSettings;
use crate::error::{Error, Result};

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Listen for one phrase. `Ok(None)` means recognition ended without a
    /// transcript.
    async fn listen(&self, locale: &str) -> Result<Option<String>>;
}

/// Recognizer running a command that prints one transcript on stdout
pub struct CommandRecognizer {
    template: CommandTemplate,
}

impl CommandRecognizer {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            template: CommandTemplate::new("speech recognition", argv),
        }
    }

    pub fn from_settings(settings: &VoiceSettings) -> Self {
        Self::new(settings.listen_command.clone())
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn listen(&self, locale: &str) -> Result<Option<String>> {
        let mut cmd = self
            .template
            .command(&[("locale", locale), ("lang", language_of(locale))])?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::adapter_failed(self.template.adapter(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::adapter_failed(
                self.template.adapter(),
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = transcript.chars().count(), "Recognition finished");

        Ok(if transcript.is_empty() { None } else { Some(transcript) })
    }
}
