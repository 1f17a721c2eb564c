//! Error types for the council client
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for council operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,

    // Model API errors (4xx)
    ApiStatus = 400,
    ApiMalformed = 401,
    StreamInterrupted = 402,
    AuthenticationFailed = 403,

    // Session errors (5xx)
    SessionUnavailable = 500,
    SessionCreateFailed = 501,

    // Persona errors (6xx)
    PersonaNotFound = 600,
    PersonaInvalid = 601,
    RosterInvalid = 602,

    // Media / voice adapter errors (7xx)
    AttachmentInvalid = 700,
    AdapterNotConfigured = 701,
    AdapterFailed = 702,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 902,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            700..=799 => 70,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the council client
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection / Model API Errors
    // ─────────────────────────────────────────────────────────────

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Model API returned {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("Malformed model response: {message}")]
    ApiMalformed { message: String },

    #[error("Response stream interrupted: {message}")]
    StreamInterrupted { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────

    #[error("No usable session for persona '{persona}'")]
    SessionUnavailable { persona: String },

    #[error("Failed to create session for persona '{persona}': {message}")]
    SessionCreate { persona: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Persona Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Persona not found: {id}")]
    PersonaNotFound { id: String },

    #[error("Invalid persona '{id}': {reason}")]
    PersonaInvalid { id: String, reason: String },

    #[error("Invalid roster '{name}': {reason}")]
    RosterInvalid { name: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Media / Voice Adapter Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Invalid attachment: {reason}")]
    AttachmentInvalid { reason: String },

    #[error("{adapter} is not configured")]
    AdapterNotConfigured { adapter: &'static str },

    #[error("{adapter} failed: {message}")]
    AdapterFailed { adapter: &'static str, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Http(e) if e.is_timeout() => ErrorCode::ConnectionTimeout,
            Error::Http(_) => ErrorCode::ConnectionFailed,
            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ApiStatus { .. } => ErrorCode::ApiStatus,
            Error::ApiMalformed { .. } => ErrorCode::ApiMalformed,
            Error::StreamInterrupted { .. } => ErrorCode::StreamInterrupted,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,

            Error::SessionUnavailable { .. } => ErrorCode::SessionUnavailable,
            Error::SessionCreate { .. } => ErrorCode::SessionCreateFailed,

            Error::PersonaNotFound { .. } => ErrorCode::PersonaNotFound,
            Error::PersonaInvalid { .. } => ErrorCode::PersonaInvalid,
            Error::RosterInvalid { .. } => ErrorCode::RosterInvalid,

            Error::AttachmentInvalid { .. } => ErrorCode::AttachmentInvalid,
            Error::AdapterNotConfigured { .. } => ErrorCode::AdapterNotConfigured,
            Error::AdapterFailed { .. } => ErrorCode::AdapterFailed,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'council config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'council config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::AuthenticationFailed { .. } => Some(
                "Set GEMINI_API_KEY (or model.api_key in council.toml) to a valid key."
            ),
            Error::ConnectionFailed { .. } | Error::Http(_) => Some(
                "Check your network connection and the model.base_url setting."
            ),
            Error::PersonaNotFound { .. } => Some(
                "Run 'council persona list' to see the available personas."
            ),
            Error::RosterInvalid { .. } => Some(
                "Check the roster file referenced by council.roster_file."
            ),
            Error::AdapterNotConfigured { .. } => Some(
                "Set the matching command in the [voice] or [capture] section of council.toml."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn persona_not_found(id: impl Into<String>) -> Self {
        Error::PersonaNotFound { id: id.into() }
    }

    pub fn roster_invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::RosterInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn attachment_invalid(reason: impl Into<String>) -> Self {
        Error::AttachmentInvalid {
            reason: reason.into(),
        }
    }

    pub fn adapter_failed(adapter: &'static str, message: impl Into<String>) -> Self {
        Error::AdapterFailed {
            adapter,
            message: message.into(),
        }
    }

    pub fn stream_interrupted(message: impl Into<String>) -> Self {
        Error::StreamInterrupted {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::ApiStatus.as_str(), "E400");
        assert_eq!(ErrorCode::PersonaNotFound.as_str(), "E600");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::ConnectionFailed.exit_code(), 30);
        assert_eq!(ErrorCode::SessionUnavailable.exit_code(), 50);
        assert_eq!(ErrorCode::PersonaNotFound.exit_code(), 60);
        assert_eq!(ErrorCode::AdapterFailed.exit_code(), 70);
        assert_eq!(ErrorCode::NotSupported.exit_code(), 90);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::persona_not_found("x").code(), ErrorCode::PersonaNotFound);
        assert_eq!(
            Error::stream_interrupted("eof").code(),
            ErrorCode::StreamInterrupted
        );
        assert_eq!(
            Error::adapter_failed("speech synthesis", "exit 1").code(),
            ErrorCode::AdapterFailed
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }

    #[test]
    fn test_suggestions() {
        let err = Error::config_not_found("/tmp/council.toml");
        assert!(err.suggestion().unwrap().contains("config init"));

        let err = Error::persona_not_found("nobody");
        assert!(err.suggestion().unwrap().contains("persona list"));

        assert!(Error::Internal("x".into()).suggestion().is_none());
    }

    #[test]
    fn test_format_for_terminal() {
        let formatted = Error::config_not_found("/test/council.toml").format_for_terminal();
        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::persona_not_found("ghost").format_for_log();
        assert_eq!(formatted, "[E600] Persona not found: ghost");
        assert!(!formatted.contains("\x1b["));
    }
}
