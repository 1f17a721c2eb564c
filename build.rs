//! Build script for the council binary
//!
//! Embeds build-time information (git revision, timestamp, target triple,
//! compiler version) as `COUNCIL_*` environment variables read by `version.rs`.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_stdout("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_stdout("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(out) if out.status.success() => {
            if out.stdout.is_empty() { "false" } else { "true" }
        }
        _ => "unknown",
    };

    let vars = [
        ("COUNCIL_GIT_HASH", git_hash.clone()),
        ("COUNCIL_GIT_BRANCH", git_branch),
        ("COUNCIL_GIT_DIRTY", git_dirty.to_string()),
        (
            "COUNCIL_BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("COUNCIL_TARGET", env_or_unknown("TARGET")),
        ("COUNCIL_PROFILE", env_or_unknown("PROFILE")),
        ("COUNCIL_RUSTC_VERSION", command_stdout("rustc", &["--version"])),
        ("COUNCIL_HOST", env_or_unknown("HOST")),
    ];

    for (key, value) in &vars {
        println!("cargo:rustc-env={}={}", key, value);
    }

    eprintln!("Building council:");
    eprintln!("  Git:     {}{}", git_hash, if git_dirty == "true" { " (dirty)" } else { "" });
    eprintln!("  Target:  {}", env_or_unknown("TARGET"));
}

/// Run a command and return its trimmed stdout, or "unknown" on any failure
fn command_stdout(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}
