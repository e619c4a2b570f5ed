//! `eflintd`: supervises one eFLINT reasoning engine and drives it from a
//! line console on stdin.
//!
//! ```text
//! main() -> EflintConfig::load -> init_tracing -> [auto-start] -> console loop
//!                                                                   |
//!                                          EOF | :quit | Ctrl-C -> shutdown
//! ```

mod args;
mod console;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::future;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use eflint_config::EflintConfig;
use eflint_supervisor::{Manager, StateManager};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Invocation, USAGE};
use crate::console::{Console, ConsoleCommand};

const LOG_FILE_NAME: &str = "eflintd.log";

fn init_tracing(log_dir: Option<PathBuf>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file(log_dir);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // The console owns stdout; logs go to stderr when no file can be opened.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(log_dir: Option<PathBuf>) -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut candidates: Vec<PathBuf> = log_dir.into_iter().collect();
    // Fallback: ./.eflint/logs (useful in constrained environments)
    candidates.push(PathBuf::from(".eflint").join("logs"));

    let mut warnings = Vec::new();
    for dir in candidates {
        if let Err(e) = fs::create_dir_all(&dir) {
            warnings.push(format!("Failed to create log dir {}: {e}", dir.display()));
            continue;
        }

        let path = dir.join(LOG_FILE_NAME);
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => return (Some((path, file)), warnings),
            Err(e) => warnings.push(format!("Failed to open log file {}: {e}", path.display())),
        }
    }

    (None, warnings)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {e}");
        future::pending::<()>().await;
    }
}

async fn run_console(console: &Console) -> Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    let interrupt = interrupted();
    tokio::pin!(interrupt);

    loop {
        let line = tokio::select! {
            () = &mut interrupt => {
                tracing::info!("Interrupted");
                return Ok(());
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Quit) => return Ok(()),
            Ok(command) => command,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match console.execute(command).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{output}"),
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match args::parse(env::args().skip(1))? {
        Invocation::Run(args) => args,
        Invocation::Help => {
            println!("{USAGE}");
            return Ok(());
        }
    };

    let config = EflintConfig::load(args.config.as_deref()).context("failed to load config")?;
    init_tracing(config.log_dir());

    let manager = Arc::new(Manager::new(config.manager_config()));
    let console = Console::new(StateManager::new(manager, config.state_dir()));

    if args.auto_start
        && let Some(model) = config.model_path()
    {
        match console.execute(ConsoleCommand::Start(model.to_string())).await {
            Ok(output) => println!("{output}"),
            Err(e) => {
                tracing::warn!(model, "Auto-start failed: {e:#}");
                eprintln!("error: auto-start with {model} failed: {e:#}");
            }
        }
    }

    let result = run_console(&console).await;
    console.shutdown().await;
    result
}
