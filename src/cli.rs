//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the council chat client.

use clap::{Args, Parser, Subcommand};

/// Council - terminal chat with a council of AI personas
///
/// Talks to a hosted streaming language model through persona-bound
/// sessions, with optional spoken answers, dictation and screenshots.
#[derive(Parser, Debug)]
#[command(name = "council")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that opens a session
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Path to configuration file
    #[arg(short, long, env = "COUNCIL_CONFIG")]
    pub config: Option<String>,

    /// Persona to start with
    #[arg(short, long)]
    pub persona: Option<String>,

    /// Bundled roster to use (council, companion)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Custom roster TOML file (overrides --mode)
    #[arg(long)]
    pub roster: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive conversation
    Chat {
        #[command(flatten)]
        session: SessionArgs,

        /// Speak every answer aloud
        #[arg(long)]
        voice: bool,

        /// Disable coloured output
        #[arg(long)]
        no_color: bool,
    },

    /// Ask a single question and print the streamed answer
    Ask {
        #[command(flatten)]
        session: SessionArgs,

        /// Image file or data URI to send with the question
        #[arg(short, long)]
        image: Option<String>,

        /// Attach a screenshot to the question
        #[arg(long, conflicts_with = "image")]
        screenshot: bool,

        /// Speak the answer aloud
        #[arg(long)]
        voice: bool,

        /// The question (may be omitted when an image is given)
        #[arg(required_unless_present_any = ["image", "screenshot"])]
        question: Vec<String>,
    },

    /// Persona and roster inspection
    Persona {
        #[command(subcommand)]
        subcommand: PersonaSubcommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Persona subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PersonaSubcommand {
    /// List the personas of the active roster
    List {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Show one persona, including its full system instruction
    Show {
        /// Persona id
        id: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// List the bundled rosters
    Rosters,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration (API key redacted)
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Verifies that the CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_chat_defaults() {
        let cli = Cli::parse_from(["council", "chat"]);
        match cli.command {
            Commands::Chat {
                session,
                voice,
                no_color,
            } => {
                assert!(session.persona.is_none());
                assert!(session.mode.is_none());
                assert!(!voice);
                assert!(!no_color);
            }
            _ => panic!("Expected Chat command"),
        }
    }

    #[test]
    fn test_chat_with_options() {
        let cli = Cli::parse_from([
            "council",
            "chat",
            "--mode",
            "companion",
            "--persona",
            "stoic",
            "--voice",
        ]);
        match cli.command {
            Commands::Chat { session, voice, .. } => {
                assert_eq!(session.mode.as_deref(), Some("companion"));
                assert_eq!(session.persona.as_deref(), Some("stoic"));
                assert!(voice);
            }
            _ => panic!("Expected Chat command"),
        }
    }

    #[test]
    fn test_ask_collects_words() {
        let cli = Cli::parse_from(["council", "ask", "-p", "galen", "¿qué", "opinas?"]);
        match cli.command {
            Commands::Ask {
                session, question, ..
            } => {
                assert_eq!(session.persona.as_deref(), Some("galen"));
                assert_eq!(question, vec!["¿qué", "opinas?"]);
            }
            _ => panic!("Expected Ask command"),
        }
    }

    #[test]
    fn test_ask_image_conflicts_with_screenshot() {
        let result =
            Cli::try_parse_from(["council", "ask", "--image", "a.png", "--screenshot", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_persona_show() {
        let cli = Cli::parse_from(["council", "persona", "show", "math", "--mode", "council"]);
        match cli.command {
            Commands::Persona {
                subcommand: PersonaSubcommand::Show { id, session },
            } => {
                assert_eq!(id, "math");
                assert_eq!(session.mode.as_deref(), Some("council"));
            }
            _ => panic!("Expected Persona Show command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["council", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["council", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["council", "config", "init", "--path", "/tmp/c.toml", "-f"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert_eq!(path.as_deref(), Some("/tmp/c.toml"));
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
