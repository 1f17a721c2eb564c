//! Configuration system for the council client
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (COUNCIL_* prefix, plus GEMINI_API_KEY / API_KEY)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Hosted model settings
    pub model: ModelSettings,

    /// Persona roster selection
    pub council: CouncilSettings,

    /// Speech synthesis and recognition
    pub voice: VoiceSettings,

    /// Screen capture
    pub capture: CaptureSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Hosted model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Backend provider: "gemini" or "scripted" (offline echo, used by tests)
    pub provider: String,

    /// API key (usually supplied through GEMINI_API_KEY instead)
    pub api_key: String,

    /// API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Token budget for the model's internal reasoning (0 disables it)
    pub thinking_budget: u32,

    /// Let the model ground answers with web search (produces citations)
    pub search_grounding: bool,

    /// TCP connect timeout in seconds. The response stream itself has no timeout.
    pub connect_timeout_secs: u64,
}

/// Persona roster selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilSettings {
    /// Bundled roster to use: "council" or "companion"
    pub mode: String,

    /// Path to a custom roster TOML file (overrides `mode`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster_file: Option<String>,

    /// Initially selected persona id (defaults to the roster's default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Speech synthesis and recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Speak every completed answer aloud
    pub output_enabled: bool,

    /// Fixed locale for synthesis and recognition
    pub locale: String,

    /// Speech rate multiplier (1.0 = normal)
    pub rate: f32,

    /// Speech pitch multiplier (1.0 = normal)
    pub pitch: f32,

    /// Synthesis command. Placeholders: {text} {locale} {lang} {rate} {pitch},
    /// plus {wpm} (words per minute) and {pitch_level} (0-99) scaled from them.
    /// Without {text} the text is written to the command's stdin.
    pub speak_command: Vec<String>,

    /// Recognition command; must print one transcript on stdout and exit.
    /// Placeholders: {locale} {lang}
    pub listen_command: Vec<String>,
}

/// Screen capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Command that writes a single PNG frame to stdout
    pub command: Vec<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            thinking_budget: 2048,
            search_grounding: true,
            connect_timeout_secs: 30,
        }
    }
}

impl Default for CouncilSettings {
    fn default() -> Self {
        Self {
            mode: "council".to_string(),
            roster_file: None,
            persona: None,
        }
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            output_enabled: false,
            locale: "es-ES".to_string(),
            rate: 1.0,
            pitch: 1.0,
            speak_command: default_speak_command(),
            listen_command: vec![],
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            command: default_capture_command(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

fn default_speak_command() -> Vec<String> {
    let parts: &[&str] = if cfg!(target_os = "macos") {
        // say has no pitch option
        &["say", "-r", "{wpm}", "{text}"]
    } else {
        &["espeak-ng", "-v", "{lang}", "-s", "{wpm}", "-p", "{pitch_level}", "{text}"]
    };
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_capture_command() -> Vec<String> {
    let parts: &[&str] = if cfg!(target_os = "macos") {
        &["screencapture", "-x", "-t", "png", "/dev/stdout"]
    } else {
        &["grim", "-"]
    };
    parts.iter().map(|s| s.to_string()).collect()
}

const VALID_PROVIDERS: [&str; 2] = ["gemini", "scripted"];

impl CouncilConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("council.toml"),
            dirs::config_dir()
                .map(|p| p.join("council").join("council.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".council").join("council.toml"))
                .unwrap_or_default(),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply overrides from an environment-like lookup
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |val: String| val.eq_ignore_ascii_case("true") || val == "1";

        // Model settings
        if let Some(val) = lookup("COUNCIL_PROVIDER") {
            self.model.provider = val;
        }
        if let Some(val) = lookup("COUNCIL_API_KEY")
            .or_else(|| lookup("GEMINI_API_KEY"))
            .or_else(|| lookup("API_KEY"))
        {
            self.model.api_key = val;
        }
        if let Some(val) = lookup("COUNCIL_BASE_URL") {
            self.model.base_url = val;
        }
        if let Some(val) = lookup("COUNCIL_MODEL") {
            self.model.model = val;
        }
        if let Some(n) = lookup("COUNCIL_THINKING_BUDGET").and_then(|v| v.parse().ok()) {
            self.model.thinking_budget = n;
        }
        if let Some(val) = lookup("COUNCIL_SEARCH_GROUNDING") {
            self.model.search_grounding = flag(val);
        }

        // Roster settings
        if let Some(val) = lookup("COUNCIL_MODE") {
            self.council.mode = val;
        }
        if let Some(val) = lookup("COUNCIL_ROSTER_FILE") {
            self.council.roster_file = Some(val);
        }
        if let Some(val) = lookup("COUNCIL_PERSONA") {
            self.council.persona = Some(val);
        }

        // Voice settings
        if let Some(val) = lookup("COUNCIL_VOICE") {
            self.voice.output_enabled = flag(val);
        }
        if let Some(val) = lookup("COUNCIL_LOCALE") {
            self.voice.locale = val;
        }

        // Logging settings
        if let Some(val) = lookup("COUNCIL_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("COUNCIL_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = lookup("COUNCIL_LOG_JSON") {
            self.logging.json_format = flag(val);
        }
    }

    /// Expand ~ and environment variables in path settings
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref roster) = self.council.roster_file {
            self.council.roster_file = Some(expand_path(roster));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !VALID_PROVIDERS.contains(&self.model.provider.as_str()) {
            return Err(Error::config_field_invalid(
                "model.provider",
                format!(
                    "Unknown provider '{}'. Must be one of: {}",
                    self.model.provider,
                    VALID_PROVIDERS.join(", ")
                ),
            ));
        }

        match url::Url::parse(&self.model.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => {
                return Err(Error::config_field_invalid(
                    "model.base_url",
                    "Model base URL must be an http:// or https:// URL",
                ))
            }
        }

        if self.model.model.trim().is_empty() {
            return Err(Error::config_field_invalid("model.model", "Model name cannot be empty"));
        }

        if self.council.mode.trim().is_empty() && self.council.roster_file.is_none() {
            return Err(Error::config_field_invalid(
                "council.mode",
                "Either council.mode or council.roster_file must be set",
            ));
        }

        if self.voice.locale.trim().is_empty() {
            return Err(Error::config_field_invalid("voice.locale", "Locale cannot be empty"));
        }
        if !(0.1..=10.0).contains(&self.voice.rate) {
            return Err(Error::config_field_invalid(
                "voice.rate",
                "voice.rate must be between 0.1 and 10.0",
            ));
        }
        if !(0.0..=2.0).contains(&self.voice.pitch) {
            return Err(Error::config_field_invalid(
                "voice.pitch",
                "voice.pitch must be between 0.0 and 2.0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.model.api_key.is_empty() {
            copy.model.api_key = "********".to_string();
        }
        copy
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".council")
                .join("council.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::ConfigValidation {
            message: format!(
                "Configuration file already exists: {}. Use --force to overwrite.",
                config_path.display()
            ),
            field: None,
        });
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Council chat configuration

[model]
# Backend provider: "gemini" or "scripted" (offline echo)
provider = "gemini"

# API key. Prefer the GEMINI_API_KEY environment variable.
# api_key = ""

base_url = "https://generativelanguage.googleapis.com/v1beta"
model = "gemini-3-flash-preview"

# Token budget for the model's reasoning (0 disables it)
thinking_budget = 2048

# Ground answers with web search; sources are listed under each answer
search_grounding = true

# Connect timeout in seconds (streamed answers are never cut off)
connect_timeout_secs = 30

[council]
# Bundled roster: "council" or "companion"
mode = "council"

# Custom roster file (overrides mode)
# roster_file = "~/.council/my-roster.toml"

# Initially selected persona (defaults to the roster's default)
# persona = "synod"

[voice]
# Speak every answer aloud
output_enabled = false
locale = "es-ES"
rate = 1.0
pitch = 1.0

# Placeholders: {text} {locale} {lang} {rate} {pitch} {wpm} {pitch_level}
# speak_command = ["espeak-ng", "-v", "{lang}", "-s", "{wpm}", "-p", "{pitch_level}", "{text}"]

# Must print a single transcript on stdout
# listen_command = ["my-transcriber", "--lang", "{locale}"]

[capture]
# Must write one PNG frame to stdout
# command = ["grim", "-"]

[logging]
# Log level: trace, debug, info, warn, error (logs go to stderr)
level = "warn"

# Log file path (comment out to disable file logging)
# file = "~/.council/logs/council.log"

max_file_size_mb = 100
max_files = 5
json_format = false
"#
    .to_string()
}
