mod action;
mod cli;
mod config;
mod context;
mod elevation;
mod error;
mod error_log;
mod executor;
mod orchestrator;
mod platform;
mod playbook;
mod relay;
mod requirements;
mod scheduler;
mod state_machine;
mod summary;
mod ui;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Command};
use config::TieredConfig;
use context::RunContext;
use elevation::TrustedInstallerSession;
use error::EXIT_FATAL;
use orchestrator::{Orchestrator, RunOptions};
use platform::{PrivilegeProbe, TokenProbe};
use playbook::Playbook;
use relay::RelayWriter;
use scheduler::Privilege;
use ui::Console;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    std::process::exit(run(cli).await);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tiered=debug" } else { "tiered=info" };
    let filter = EnvFilter::try_from_env("TIERED_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> i32 {
    // Resolve user paths before moving to the executable's directory.
    let config_path = cli.config.as_deref().map(absolute);
    let command = match cli.command {
        Command::Run {
            playbook,
            resume,
            relay,
            session,
        } => Command::Run {
            playbook: absolute(&playbook),
            resume,
            relay,
            session,
        },
        Command::Status { playbook } => Command::Status {
            playbook: absolute(&playbook),
        },
        other => other,
    };
    enter_exe_dir();

    let config = match TieredConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return EXIT_FATAL;
        }
    };
    let child_args: Vec<String> = config_path
        .iter()
        .flat_map(|p| ["--config".to_string(), p.display().to_string()])
        .collect();

    match command {
        Command::Run {
            playbook,
            resume,
            relay,
            session,
        } => {
            run_playbook(
                config,
                &playbook,
                resume,
                relay,
                session.unwrap_or_default(),
                child_args,
            )
            .await
        }
        Command::Status { playbook } => print_status(&config, &playbook),
        Command::DisableProtection => {
            let probe = Box::new(TokenProbe::detect(Privilege::Admin));
            match RunContext::production(config, Console::stdout(), probe, child_args) {
                Ok(ctx) => elevation::disable_in_child(&ctx).await,
                Err(e) => {
                    tracing::error!("{e:#}");
                    1
                }
            }
        }
    }
}

async fn run_playbook(
    config: TieredConfig,
    playbook_dir: &Path,
    resume: bool,
    relay: Option<String>,
    session: Privilege,
    child_args: Vec<String>,
) -> i32 {
    if !platform::is_administrator() {
        eprintln!("This program must be launched as an Administrator!");
        return EXIT_FATAL;
    }

    let probe = TokenProbe::detect(session);
    let held = probe.current();

    if held == Privilege::Admin && !resume && relay.is_none() {
        if let Err(e) = orchestrator::reset_transcripts(&config) {
            tracing::warn!("could not delete previous transcripts: {e}");
        }
    }

    let console = match &relay {
        Some(name) => match RelayWriter::open(name, config.relay.region_size) {
            Ok(writer) => Console::relay(writer),
            Err(e) => {
                eprintln!("Could not open output relay {name}: {e}");
                return EXIT_FATAL;
            }
        },
        None => Console::stdout(),
    };
    let transcript = match held {
        Privilege::Admin => orchestrator::ADMIN_TRANSCRIPT,
        Privilege::TrustedInstaller => orchestrator::TI_TRANSCRIPT,
    };
    let console = console.with_transcript(&config.logs_dir.join(transcript));

    let ctx = match RunContext::production(config, console, Box::new(probe), child_args) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{e:#}");
            return EXIT_FATAL;
        }
    };

    let playbook = match Playbook::load(playbook_dir) {
        Ok(playbook) => playbook,
        Err(e) => {
            ctx.error_log.record(&e.to_string(), "", "No playbook selected.");
            ctx.console.fatal(&e.to_string());
            return EXIT_FATAL;
        }
    };

    let elevator = TrustedInstallerSession::new(playbook_dir.to_path_buf());
    match Orchestrator::new(&ctx, playbook, RunOptions { resume })
        .run(&elevator)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(?outcome, "run complete");
            0
        }
        Err(e) => {
            ctx.console.fatal(&e.to_string());
            EXIT_FATAL
        }
    }
}

fn print_status(config: &TieredConfig, playbook_dir: &Path) -> i32 {
    let console = Console::stdout();
    let playbook = match Playbook::load(playbook_dir) {
        Ok(playbook) => playbook,
        Err(e) => {
            console.fatal(&e.to_string());
            return EXIT_FATAL;
        }
    };
    let rows = match orchestrator::playbook_status(&playbook, &config.ledger_path) {
        Ok(rows) => rows,
        Err(e) => {
            console.fatal(&e.to_string());
            return EXIT_FATAL;
        }
    };

    console.status(&format!("Playbook: {}", playbook.meta.name));
    for row in &rows {
        let mark = if row.done { "x" } else { " " };
        console.line(&format!(
            "[{mark}] {:>4}  {:<16}  {}",
            row.priority,
            row.privilege.to_string(),
            row.title
        ));
    }
    let total: u64 = rows.iter().map(|r| r.weight).sum();
    console.line(&format!("Total weight: {total}"));
    0
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

// After a reboot the process may start in the system directory.
fn enter_exe_dir() {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    if let Some(dir) = dir {
        if let Err(e) = std::env::set_current_dir(&dir) {
            tracing::warn!("could not enter {}: {e}", dir.display());
        }
    }
}
