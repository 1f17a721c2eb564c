//! Common test utilities and fixtures
//!
//! Every test runs the binary inside its own temporary home directory so a
//! developer's real configuration and API keys never leak into the results.

#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

/// Environment variables that would change the binary's behavior
const COUNCIL_ENV: &[&str] = &[
    "COUNCIL_CONFIG",
    "COUNCIL_PROVIDER",
    "COUNCIL_API_KEY",
    "GEMINI_API_KEY",
    "API_KEY",
    "COUNCIL_BASE_URL",
    "COUNCIL_MODEL",
    "COUNCIL_THINKING_BUDGET",
    "COUNCIL_SEARCH_GROUNDING",
    "COUNCIL_MODE",
    "COUNCIL_ROSTER_FILE",
    "COUNCIL_PERSONA",
    "COUNCIL_VOICE",
    "COUNCIL_LOCALE",
    "COUNCIL_LOG_LEVEL",
    "COUNCIL_LOG_FILE",
    "COUNCIL_LOG_JSON",
    "RUST_LOG",
];

/// An isolated home and working directory
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `name` inside the home and return its path
    pub fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// A `council` command confined to this home
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("council").unwrap();
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join(".config"));
        for var in COUNCIL_ENV {
            cmd.env_remove(var);
        }
        cmd
    }
}
