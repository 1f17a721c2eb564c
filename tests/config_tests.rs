//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the `config` subcommands.

mod common;

use std::fs;

use predicates::prelude::*;

use common::TestHome;

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_default_config_is_valid() {
    let home = TestHome::new();
    home.cmd()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_minimal_config() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[model]
provider = "scripted"
"#,
    );

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .success();
}

#[test]
fn test_full_config() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[model]
provider = "gemini"
api_key = "test-key"
base_url = "https://generativelanguage.googleapis.com/v1beta"
model = "gemini-3-flash-preview"
thinking_budget = 1024
search_grounding = false
connect_timeout_secs = 10

[council]
mode = "companion"
persona = "zen"

[voice]
output_enabled = true
locale = "es-MX"
rate = 1.2
pitch = 0.9
speak_command = ["espeak-ng", "-v", "{lang}", "{text}"]
listen_command = ["transcribe", "--lang", "{locale}"]

[capture]
command = ["grim", "-"]

[logging]
level = "debug"
json_format = true
"#,
    );

    home.cmd()
        .args(["config", "show", "--config", &path])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"companion\""))
        .stdout(predicate::str::contains("locale = \"es-MX\""))
        .stdout(predicate::str::contains("thinking_budget = 1024"));
}

#[test]
fn test_config_in_working_directory_is_found() {
    let home = TestHome::new();
    home.write(
        "council.toml",
        r#"
[council]
mode = "companion"
"#,
    );

    home.cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"companion\""));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_provider() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[model]
provider = "carrier-pigeon"
"#,
    );

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("carrier-pigeon"));
}

#[test]
fn test_invalid_base_url() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[model]
base_url = "ftp://example.com"
"#,
    );

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .code(10);
}

#[test]
fn test_invalid_voice_rate() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[voice]
rate = 42.0
"#,
    );

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("voice.rate"));
}

#[test]
fn test_invalid_log_level() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[logging]
level = "loud"
"#,
    );

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .failure();
}

#[test]
fn test_malformed_toml() {
    let home = TestHome::new();
    let path = home.write("council.toml", "[model\nprovider = ");

    home.cmd()
        .args(["config", "validate", "--config", &path])
        .assert()
        .code(10);
}

#[test]
fn test_missing_explicit_config() {
    let home = TestHome::new();
    home.cmd()
        .args(["config", "show", "--config", "/nonexistent/council.toml"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("not found"));
}

// ─────────────────────────────────────────────────────────────────
// Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let home = TestHome::new();
    let path = home.path().join("nested").join("council.toml");

    home.cmd()
        .args(["config", "init", "--path", path.to_str().unwrap()])
        .assert()
        .success();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[model]"));
    assert!(content.contains("[voice]"));

    // The generated file must itself be valid
    home.cmd()
        .args(["config", "validate", "--config", path.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_config_init_default_location() {
    let home = TestHome::new();
    home.cmd().args(["config", "init"]).assert().success();
    assert!(home.path().join(".council").join("council.toml").exists());
}

#[test]
fn test_config_init_refuses_overwrite() {
    let home = TestHome::new();
    let path = home.write("council.toml", "# existing\n");

    home.cmd()
        .args(["config", "init", "--path", &path])
        .assert()
        .failure();
    assert_eq!(fs::read_to_string(&path).unwrap(), "# existing\n");
}

#[test]
fn test_config_init_force_overwrite() {
    let home = TestHome::new();
    let path = home.write("council.toml", "# existing\n");

    home.cmd()
        .args(["config", "init", "--force", "--path", &path])
        .assert()
        .success();
    assert!(fs::read_to_string(&path).unwrap().contains("[model]"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_model() {
    let home = TestHome::new();
    let path = home.write(
        "council.toml",
        r#"
[model]
model = "file-model"
"#,
    );

    home.cmd()
        .args(["config", "show", "--config", &path])
        .env("COUNCIL_MODEL", "env-model")
        .assert()
        .success()
        .stdout(predicate::str::contains("env-model"))
        .stdout(predicate::str::contains("file-model").not());
}

#[test]
fn test_api_key_is_redacted() {
    let home = TestHome::new();
    home.cmd()
        .args(["config", "show"])
        .env("GEMINI_API_KEY", "super-secret-key")
        .assert()
        .success()
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("super-secret-key").not());
}

#[test]
fn test_tilde_expansion_in_roster_file() {
    let home = TestHome::new();
    home.write(
        "rosters/duo.toml",
        r#"
name = "duo"
base_instruction = "Sé breve."
default_persona = "left"
greeting = "Hola."
apology = "Perdón."

[[persona]]
id = "left"
label = "Izquierda"
prompt = "Mira a la izquierda."
"#,
    );
    let path = home.write(
        "council.toml",
        r#"
[council]
roster_file = "~/rosters/duo.toml"
"#,
    );

    home.cmd()
        .args(["persona", "list", "--config", &path])
        .assert()
        .success()
        .stdout(predicate::str::contains("Izquierda"));
}
