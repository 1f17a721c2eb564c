//! Roster registry: bundled persona modes plus custom rosters loaded from disk.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::types::Roster;
use crate::config::CouncilSettings;
use crate::error::{Error, Result};

/// Names of the rosters compiled into the binary.
pub const BUNDLED_ROSTERS: [&str; 2] = ["council", "companion"];

/// Registry of available rosters.
pub struct RosterRegistry;

impl RosterRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Get the bundled TOML source for a roster name.
    pub fn get_bundled_source(&self, name: &str) -> Option<&'static str> {
        match name {
            "council" => Some(include_str!("../../config/rosters/council.toml")),
            "companion" => Some(include_str!("../../config/rosters/companion.toml")),
            _ => None,
        }
    }

    /// Parse a bundled roster by name.
    pub fn bundled(&self, name: &str) -> Result<Roster> {
        let source = self.get_bundled_source(name).ok_or_else(|| {
            Error::roster_invalid(
                name,
                format!(
                    "unknown mode. Bundled modes: {}",
                    BUNDLED_ROSTERS.join(", ")
                ),
            )
        })?;
        Roster::from_toml(source, name)
    }

    /// Load a roster from a TOML file. The file stem names it when the
    /// document has no `name` key.
    pub fn from_file(&self, path: &Path) -> Result<Roster> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("custom");
        let roster = Roster::from_toml(&content, fallback)?;
        info!(
            path = %path.display(),
            roster = %roster.name,
            personas = roster.personas.len(),
            "Loaded custom roster"
        );
        Ok(roster)
    }

    /// Resolve the roster selected by configuration: a custom file wins over
    /// the bundled mode.
    pub fn load(&self, settings: &CouncilSettings) -> Result<Roster> {
        match settings.roster_file {
            Some(ref file) => self.from_file(Path::new(file)),
            None => {
                debug!(mode = %settings.mode, "Using bundled roster");
                self.bundled(&settings.mode)
            }
        }
    }

    /// Summaries of the bundled rosters.
    pub fn list_available(&self) -> Vec<RosterListing> {
        BUNDLED_ROSTERS
            .iter()
            .filter_map(|name| self.bundled(name).ok())
            .map(|roster| RosterListing {
                name: roster.name.clone(),
                title: roster.title.clone(),
                personas: roster.personas.len(),
            })
            .collect()
    }
}

impl Default for RosterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of an available roster.
#[derive(Debug, Clone)]
pub struct RosterListing {
    pub name: String,
    pub title: String,
    pub personas: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_all_bundled_rosters_parse() {
        let registry = RosterRegistry::new();
        for name in BUNDLED_ROSTERS {
            let roster = registry.bundled(name).unwrap();
            assert_eq!(roster.name, name);
            assert!(!roster.personas.is_empty());
        }
    }

    #[test]
    fn test_council_roster_contents() {
        let roster = RosterRegistry::new().bundled("council").unwrap();
        assert_eq!(
            roster.personas.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["synod", "philosopher", "analyst", "strategist", "math", "galen", "humanist"]
        );
        assert_eq!(roster.default_persona().id, "synod");
        assert_eq!(
            roster.apology,
            "El caos ha interrumpido la sesión del Consejo."
        );
        assert!(roster.base_instruction.starts_with("Estás en la Cámara"));
        assert!(roster.personas.iter().all(|p| p.rgb().is_some()));
    }

    #[test]
    fn test_companion_roster_has_role_labels() {
        let roster = RosterRegistry::new().bundled("companion").unwrap();
        assert!(roster.personas.iter().all(|p| p.role_label.is_some()));
    }

    #[test]
    fn test_unknown_mode() {
        let err = RosterRegistry::new().bundled("parliament").unwrap_err();
        assert!(err.to_string().contains("unknown mode"));
    }

    #[test]
    fn test_load_prefers_roster_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
base_instruction = "Base"
default_persona = "solo"
greeting = "Hi"
apology = "Oops"

[[persona]]
id = "solo"
label = "Solo"
prompt = "Alone."
"#
        )
        .unwrap();

        let settings = CouncilSettings {
            mode: "council".to_string(),
            roster_file: Some(file.path().to_string_lossy().to_string()),
            persona: None,
        };
        let roster = RosterRegistry::new().load(&settings).unwrap();
        assert_eq!(roster.personas.len(), 1);
        assert_eq!(roster.personas[0].id, "solo");
        assert!(!roster.name.is_empty());
    }

    #[test]
    fn test_missing_roster_file() {
        let settings = CouncilSettings {
            roster_file: Some("/nonexistent/roster.toml".to_string()),
            ..Default::default()
        };
        let err = RosterRegistry::new().load(&settings).unwrap_err();
        assert!(matches!(err, Error::IoRead { .. }));
    }

    #[test]
    fn test_list_available() {
        let list = RosterRegistry::new().list_available();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|l| l.bundled));
    }
}
