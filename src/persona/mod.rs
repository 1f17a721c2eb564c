//! Persona system: rosters of system-prompt personas.
//!
//! A roster ("mode") is loaded once at startup, either from the bundled
//! definitions or from a user TOML file. Personas are immutable; only the
//! selection held by the session manager changes.

pub mod registry;
pub mod types;

pub use registry::{RosterListing, RosterRegistry, BUNDLED_ROSTERS};
pub use types::{Persona, Roster};
