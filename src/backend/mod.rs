//! Backend module for the hosted model
//!
//! This module provides the session abstraction and its implementations:
//! the Gemini streaming API and a scripted backend for tests and offline use.

mod gemini;
mod scripted;
mod traits;

use std::sync::Arc;

pub use gemini::{GeminiBackend, GeminiConfig};
pub use scripted::{ScriptEnd, ScriptedBackend, ScriptedConfig, ScriptedReply, SentMessage};
pub use traits::*;

use crate::config::ModelSettings;
use crate::error::{Error, Result};

/// Build the backend selected by `settings.provider`
pub fn create_backend(settings: &ModelSettings) -> Result<Arc<dyn ChatBackend>> {
    match settings.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiBackend::new(GeminiConfig::from(settings))?)),
        "scripted" => Ok(Arc::new(ScriptedBackend::new())),
        other => Err(Error::NotSupported(format!("model provider '{}'", other))),
    }
}
