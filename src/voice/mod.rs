//! Voice and capture adapters
//!
//! Speech synthesis, speech recognition and screen capture are external
//! engines. Each is reached through a trait; the default implementations run
//! a configured command line.

mod capture;
mod recognizer;
mod speaker;

pub use capture::{CommandCapturer, ScreenCapturer};
pub use recognizer::{CommandRecognizer, Recognizer};
pub use speaker::{strip_markup, CommandSpeaker, Speaker, Utterance};

use tokio::process::Command;

use crate::error::{Error, Result};

/// A command line with `{name}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    adapter: &'static str,
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new(adapter: &'static str, argv: Vec<String>) -> Self {
        Self { adapter, argv }
    }

    pub fn is_configured(&self) -> bool {
        self.argv.first().is_some_and(|p| !p.trim().is_empty())
    }

    /// Whether any argument references `{name}`
    pub fn uses(&self, name: &str) -> bool {
        let needle = format!("{{{}}}", name);
        self.argv.iter().any(|a| a.contains(&needle))
    }

    /// Substitute placeholders, returning the final argv.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<Vec<String>> {
        if !self.is_configured() {
            return Err(Error::AdapterNotConfigured {
                adapter: self.adapter,
            });
        }
        Ok(self
            .argv
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
            })
            .collect())
    }

    /// Build a process for the rendered command line.
    pub fn command(&self, vars: &[(&str, &str)]) -> Result<Command> {
        let argv = self.render(vars)?;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).kill_on_drop(true);
        Ok(cmd)
    }

    pub fn adapter(&self) -> &'static str {
        self.adapter
    }
}

/// Primary language subtag of a locale ("es-ES" -> "es")
pub fn language_of(locale: &str) -> &str {
    locale.split(['-', '_']).next().unwrap_or(locale)
}
