//! Council - terminal chat with a council of AI personas
//!
//! This is the main entry point for the `council` binary. It loads the
//! configuration and the persona roster, wires the model backend and the
//! voice adapters into a session manager, and hands it to the interactive
//! REPL or runs a single question.

mod backend;
mod cli;
mod config;
mod error;
mod logging;
mod persona;
mod repl;
mod session;
mod types;
mod version;
mod voice;

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use crate::backend::create_backend;
use crate::cli::{Cli, Commands, ConfigSubcommand, PersonaSubcommand, SessionArgs};
use crate::config::CouncilConfig;
use crate::error::{Error, Result};
use crate::persona::RosterRegistry;
use crate::session::{SessionManager, SubmitOutcome};
use crate::voice::{CommandCapturer, CommandRecognizer, CommandSpeaker};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Persona { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_persona_command(subcommand)
        }
        Commands::Chat {
            session,
            voice,
            no_color,
        } => {
            let mut config = load_config(&session)?;
            if voice {
                config.voice.output_enabled = true;
            }
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            log_startup(&config);

            let color = !no_color && std::io::stdout().is_terminal();
            runtime()?.block_on(chat(config, color))
        }
        Commands::Ask {
            session,
            image,
            screenshot,
            voice,
            question,
        } => {
            let mut config = load_config(&session)?;
            if voice {
                config.voice.output_enabled = true;
            }
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            log_startup(&config);

            let question = question.join(" ");
            runtime()?.block_on(ask(config, question, image, screenshot))
        }
    }
}

/// The client is single-threaded and cooperative
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))
}

fn log_startup(config: &CouncilConfig) {
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        provider = %config.model.provider,
        model = %config.model.model,
        mode = %config.council.mode,
        "Starting council"
    );
}

/// Load configuration and apply the per-command overrides
fn load_config(args: &SessionArgs) -> Result<CouncilConfig> {
    let mut config = CouncilConfig::load(args.config.as_deref())?;

    if let Some(ref mode) = args.mode {
        config.council.mode = mode.clone();
        config.council.roster_file = None;
    }
    if let Some(ref roster) = args.roster {
        config.council.roster_file = Some(roster.clone());
    }
    if let Some(ref persona) = args.persona {
        config.council.persona = Some(persona.clone());
    }

    config.validate()?;
    Ok(config)
}

/// Build a session manager with the configured roster, backend and adapters.
///
/// Voice output starts disabled; callers enable it once the session exists.
fn build_manager(config: &CouncilConfig) -> Result<SessionManager> {
    let roster = RosterRegistry::new().load(&config.council)?;
    let backend = create_backend(&config.model)?;

    let mut voice = config.voice.clone();
    voice.output_enabled = false;

    let mut manager = SessionManager::new(roster, backend).with_voice_settings(voice);

    if let Some(ref persona) = config.council.persona {
        manager = manager.with_persona(persona)?;
    }
    if !config.voice.speak_command.is_empty() {
        manager = manager.with_speaker(Arc::new(CommandSpeaker::from_settings(&config.voice)));
    }
    if !config.voice.listen_command.is_empty() {
        manager = manager.with_recognizer(Arc::new(CommandRecognizer::from_settings(
            &config.voice,
        )));
    }
    if !config.capture.command.is_empty() {
        manager = manager.with_capturer(Arc::new(CommandCapturer::from_settings(&config.capture)));
    }

    Ok(manager)
}

async fn chat(config: CouncilConfig, color: bool) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = Arc::new(build_manager(&config)?.with_events(tx));
    if config.voice.output_enabled {
        manager.set_voice_output(true);
    }
    repl::run(manager, rx, color).await
}

async fn ask(
    config: CouncilConfig,
    question: String,
    image: Option<String>,
    screenshot: bool,
) -> Result<()> {
    // Nothing is printed until the answer is complete
    let manager = build_manager(&config)?;

    if !manager.activate().await {
        return Err(Error::SessionUnavailable {
            persona: manager.persona().id,
        });
    }
    if config.voice.output_enabled {
        manager.set_voice_output(true);
    }

    if let Some(ref source) = image {
        manager.attach_from(source).await?;
    }
    if screenshot {
        manager.capture_screen().await?;
    }
    manager.set_input(question);

    let outcome = manager.submit().await;
    manager.finish_speaking().await;

    match outcome {
        SubmitOutcome::Completed(turn) => {
            println!("{}", turn.text);
            for (i, c) in turn.citations().iter().enumerate() {
                println!("[{}] {} <{}>", i + 1, c.display_label(), c.uri);
            }
            Ok(())
        }
        SubmitOutcome::Failed { turn, error } => {
            eprintln!("{}", turn.text);
            Err(error)
        }
        SubmitOutcome::Rejected(reason) => Err(Error::Internal(format!("Not sent: {}", reason))),
    }
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = CouncilConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            CouncilConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}

fn handle_persona_command(subcommand: PersonaSubcommand) -> Result<()> {
    let registry = RosterRegistry::new();

    match subcommand {
        PersonaSubcommand::Rosters => {
            for listing in registry.list_available() {
                println!(
                    "{:<12} {:<32} {} personas",
                    listing.name, listing.title, listing.personas
                );
            }
        }
        PersonaSubcommand::List { session } => {
            let config = load_config(&session)?;
            let roster = registry.load(&config.council)?;
            let selected = config
                .council
                .persona
                .clone()
                .unwrap_or_else(|| roster.default_persona.clone());

            println!("{}", roster.title);
            for p in &roster.personas {
                let marker = if p.id == selected { "*" } else { " " };
                println!("{} {:<14} {:<24} {}", marker, p.id, p.label, p.description);
            }
        }
        PersonaSubcommand::Show { id, session } => {
            let config = load_config(&session)?;
            let roster = registry.load(&config.council)?;
            let persona = roster.require(&id)?;

            println!("{} ({})", persona.label, persona.id);
            if let Some(ref role) = persona.role_label {
                println!("Role:     {}", role);
            }
            if !persona.description.is_empty() {
                println!("About:    {}", persona.description);
            }
            println!("Greeting: {}", roster.greeting_for(persona));
            println!();
            println!("{}", roster.system_instruction(persona));
        }
    }

    Ok(())
}
