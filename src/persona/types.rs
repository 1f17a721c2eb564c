//! Core types for the persona system.
//!
//! A roster (a "mode") bundles a base system instruction with an ordered set
//! of personas. Each persona contributes its own prompt fragment; the two are
//! joined to frame a model session.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Persona
// ─────────────────────────────────────────────────────────────────

/// A single voice of the roster. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier (used on the CLI and in `/persona <id>`).
    pub id: String,

    /// Display label, e.g. "El Analista".
    pub label: String,

    /// Short description shown in listings.
    #[serde(default)]
    pub description: String,

    /// System-prompt fragment appended to the roster's base instruction.
    pub prompt: String,

    /// Fixed role label attached to every answer this persona produces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,

    /// Greeting seeded into an empty conversation (falls back to the roster's).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,

    /// Apology used for failed turns (falls back to the roster's).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apology: Option<String>,

    /// Text sent alongside an image when the user typed nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,

    /// Display colour as `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Persona {
    /// Display colour as an RGB triple, if one is configured and well formed.
    pub fn rgb(&self) -> Option<(u8, u8, u8)> {
        self.color.as_deref().and_then(parse_hex_color)
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Parse `#rrggbb` into its components.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

// ─────────────────────────────────────────────────────────────────
// Roster
// ─────────────────────────────────────────────────────────────────

/// A complete persona mode, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    /// Short name ("council", "companion", or a custom file's name).
    #[serde(default)]
    pub name: String,

    /// Human-readable title shown in the REPL banner.
    #[serde(default)]
    pub title: String,

    /// Shared system framing that every persona's prompt is appended to.
    pub base_instruction: String,

    /// Persona selected when nothing else is requested.
    pub default_persona: String,

    /// Default greeting for an empty conversation.
    pub greeting: String,

    /// Default apology for failed turns.
    pub apology: String,

    /// Default text sent with an image when the user typed nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,

    /// Personas in display order.
    #[serde(rename = "persona", default)]
    pub personas: Vec<Persona>,
}

impl Roster {
    /// Parse and validate a roster from TOML text.
    ///
    /// `fallback_name` is used when the document does not name itself.
    pub fn from_toml(content: &str, fallback_name: &str) -> Result<Self> {
        let mut roster: Roster = toml::from_str(content).map_err(|e| Error::RosterInvalid {
            name: fallback_name.to_string(),
            reason: e.message().to_string(),
        })?;
        if roster.name.trim().is_empty() {
            roster.name = fallback_name.to_string();
        }
        if roster.title.trim().is_empty() {
            roster.title = roster.name.clone();
        }
        roster.validate()?;
        Ok(roster)
    }

    /// Check structural invariants: non-empty, unique ids, a known default.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::roster_invalid(self.name.clone(), reason);

        if self.personas.is_empty() {
            return Err(invalid("roster defines no personas".to_string()));
        }
        if self.greeting.trim().is_empty() {
            return Err(invalid("greeting cannot be empty".to_string()));
        }
        if self.apology.trim().is_empty() {
            return Err(invalid("apology cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for persona in &self.personas {
            validate_persona(persona)?;
            if !seen.insert(persona.id.as_str()) {
                return Err(invalid(format!("duplicate persona id '{}'", persona.id)));
            }
        }

        if !seen.contains(self.default_persona.as_str()) {
            return Err(invalid(format!(
                "default_persona '{}' is not defined",
                self.default_persona
            )));
        }

        Ok(())
    }

    /// Look up a persona by id.
    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Look up a persona by id, failing with `PersonaNotFound`.
    pub fn require(&self, id: &str) -> Result<&Persona> {
        self.get(id).ok_or_else(|| Error::persona_not_found(id))
    }

    /// The roster's default persona.
    pub fn default_persona(&self) -> &Persona {
        // validate() guarantees the default exists
        self.get(&self.default_persona).unwrap_or(&self.personas[0])
    }

    /// Full system instruction for a session bound to `persona`.
    pub fn system_instruction(&self, persona: &Persona) -> String {
        format!("{}\n\n{}", self.base_instruction, persona.prompt)
    }

    pub fn greeting_for<'a>(&'a self, persona: &'a Persona) -> &'a str {
        persona.greeting.as_deref().unwrap_or(&self.greeting)
    }

    pub fn apology_for<'a>(&'a self, persona: &'a Persona) -> &'a str {
        persona.apology.as_deref().unwrap_or(&self.apology)
    }

    pub fn image_prompt_for<'a>(&'a self, persona: &'a Persona) -> Option<&'a str> {
        persona
            .image_prompt
            .as_deref()
            .or(self.image_prompt.as_deref())
    }
}

fn validate_persona(persona: &Persona) -> Result<()> {
    let invalid = |reason: &str| Error::PersonaInvalid {
        id: persona.id.clone(),
        reason: reason.to_string(),
    };

    if persona.id.is_empty()
        || !persona
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            "id must be non-empty lowercase ASCII (letters, digits, '-', '_')",
        ));
    }
    if persona.label.trim().is_empty() {
        return Err(invalid("label cannot be empty"));
    }
    if persona.prompt.trim().is_empty() {
        return Err(invalid("prompt cannot be empty"));
    }
    if let Some(ref color) = persona.color {
        if parse_hex_color(color).is_none() {
            return Err(invalid("color must be formatted as #rrggbb"));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
