//! Line-oriented console over the supervisor.
//!
//! Lines starting with `:` are console commands; anything else is normalized
//! and sent to the engine as a raw command.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use eflint_supervisor::command::normalize_command;
use eflint_supervisor::{LifecycleReport, Manager, StateManager};

pub const HELP: &str = "\
:status                 instance and engine status
:start <model>          start the engine with a model
:stop                   stop the engine
:restart                restart with the current model
:model <path>           switch to another model
:export                 print the current execution graph
:save <name>            save the graph to a file
:load <name>            import a saved graph
:states                 list saved graphs
:delete <name>          delete a saved graph
:checkpoint <name>      save a checkpoint
:restore <name>         import a checkpoint
:checkpoints            list checkpoints
:uncheckpoint <name>    delete a checkpoint
:help                   this text
:quit                   stop the engine and exit
<json>                  send a raw command";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Status,
    Start(String),
    Stop,
    Restart,
    Model(String),
    Export,
    Save(String),
    Load(String),
    States,
    Delete(String),
    Checkpoint(String),
    Restore(String),
    Checkpoints,
    Uncheckpoint(String),
    Help,
    Quit,
    Raw(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        let Some(directive) = line.strip_prefix(':') else {
            return Ok(Self::Raw(line.to_string()));
        };

        let (verb, arg) = match directive.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (directive, ""),
        };
        let required = |usage: &str| -> Result<String> {
            if arg.is_empty() {
                bail!("usage: :{verb} {usage}");
            }
            Ok(arg.to_string())
        };

        let command = match verb {
            "status" => Self::Status,
            "start" => Self::Start(required("<model>")?),
            "stop" => Self::Stop,
            "restart" => Self::Restart,
            "model" => Self::Model(required("<path>")?),
            "export" => Self::Export,
            "save" => Self::Save(required("<name>")?),
            "load" => Self::Load(required("<name>")?),
            "states" => Self::States,
            "delete" => Self::Delete(required("<name>")?),
            "checkpoint" => Self::Checkpoint(required("<name>")?),
            "restore" => Self::Restore(required("<name>")?),
            "checkpoints" => Self::Checkpoints,
            "uncheckpoint" => Self::Uncheckpoint(required("<name>")?),
            "help" | "h" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            other => bail!("unknown command ':{other}' (try :help)"),
        };
        Ok(command)
    }
}

pub struct Console {
    manager: Arc<Manager>,
    states: StateManager,
}

impl Console {
    pub fn new(states: StateManager) -> Self {
        Self {
            manager: Arc::clone(states.manager()),
            states,
        }
    }

    /// Run one command and return the text to print. `Quit` is the caller's job.
    pub async fn execute(&self, command: ConsoleCommand) -> Result<String> {
        let output = match command {
            ConsoleCommand::Empty | ConsoleCommand::Quit => String::new(),
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Status => self.status().await?,
            ConsoleCommand::Start(model) => report(&self.manager.start(&model).await?)?,
            ConsoleCommand::Stop => report(&self.manager.stop().await?)?,
            ConsoleCommand::Restart => report(&self.manager.restart().await?)?,
            ConsoleCommand::Model(path) => report(&self.manager.update_model(&path).await?)?,
            ConsoleCommand::Export => self.states.get_state().await?,
            ConsoleCommand::Save(name) => {
                let saved = self.states.save_state_to_file(&name).await?;
                format!("saved '{name}' ({})", saved.id)
            }
            ConsoleCommand::Load(name) => {
                self.states.load_state_from_file(&name).await?;
                format!("loaded '{name}'")
            }
            ConsoleCommand::States => listing(self.states.list_saved_states()?),
            ConsoleCommand::Delete(name) => {
                self.states.delete_saved_state(&name)?;
                format!("deleted '{name}'")
            }
            ConsoleCommand::Checkpoint(name) => {
                let saved = self.states.create_checkpoint(&name).await?;
                format!("checkpoint '{name}' ({})", saved.id)
            }
            ConsoleCommand::Restore(name) => {
                self.states.restore_checkpoint(&name).await?;
                format!("restored checkpoint '{name}'")
            }
            ConsoleCommand::Checkpoints => listing(self.states.list_checkpoints()?),
            ConsoleCommand::Uncheckpoint(name) => {
                self.states.delete_checkpoint(&name)?;
                format!("deleted checkpoint '{name}'")
            }
            ConsoleCommand::Raw(raw) => {
                let command = normalize_command(&raw).context("command is not valid JSON")?;
                if command.is_empty() {
                    String::new()
                } else {
                    self.manager.send_command(&command).await?
                }
            }
        };
        Ok(output)
    }

    async fn status(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(&self.manager.status())?;
        if self.manager.is_running() {
            match self.manager.engine_status().await {
                Ok(engine) => {
                    let _ = write!(out, "\nengine: {engine}");
                }
                Err(e) => tracing::warn!("Engine status query failed: {e}"),
            }
        }
        Ok(out)
    }

    /// Stop the engine if one is on record. Used on exit.
    pub async fn shutdown(&self) {
        if self.manager.status().port.is_none() {
            return;
        }
        match self.manager.stop().await {
            Ok(report) => {
                for warning in &report.warnings {
                    eprintln!("warning: {warning}");
                }
            }
            Err(e) => {
                tracing::warn!("Failed to stop eFLINT server on exit: {e}");
                eprintln!("error: {e}");
            }
        }
    }
}

fn report(report: &LifecycleReport) -> Result<String> {
    let mut out = serde_json::to_string_pretty(&report.status)?;
    for warning in &report.warnings {
        let _ = write!(out, "\nwarning: {warning}");
    }
    Ok(out)
}

fn listing(names: Vec<String>) -> String {
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use eflint_supervisor::{EngineError, ManagerConfig};
    use tempfile::TempDir;

    use super::*;

    fn console(dir: &TempDir) -> Console {
        let manager = Arc::new(Manager::new(ManagerConfig::default()));
        Console::new(StateManager::new(manager, dir.path().join("states")))
    }

    #[test]
    fn test_parses_console_commands() {
        assert_eq!(ConsoleCommand::parse("  ").unwrap(), ConsoleCommand::Empty);
        assert_eq!(ConsoleCommand::parse(":status").unwrap(), ConsoleCommand::Status);
        assert_eq!(
            ConsoleCommand::parse(":start  models/a.eflint ").unwrap(),
            ConsoleCommand::Start("models/a.eflint".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse(":uncheckpoint before").unwrap(),
            ConsoleCommand::Uncheckpoint("before".to_string())
        );
        assert_eq!(ConsoleCommand::parse(":q").unwrap(), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleCommand::parse(r#"{"command":"facts"}"#).unwrap(),
            ConsoleCommand::Raw(r#"{"command":"facts"}"#.to_string())
        );
    }

    #[test]
    fn test_missing_argument_shows_usage() {
        let err = ConsoleCommand::parse(":save").unwrap_err();
        assert_eq!(err.to_string(), "usage: :save <name>");
        assert!(ConsoleCommand::parse(":model   ").is_err());
    }

    #[test]
    fn test_unknown_directive_is_an_error() {
        let err = ConsoleCommand::parse(":frobnicate now").unwrap_err();
        assert!(err.to_string().contains(":frobnicate"));
    }

    #[tokio::test]
    async fn test_status_without_engine_reports_stopped() {
        let dir = TempDir::new().unwrap();
        let out = console(&dir).execute(ConsoleCommand::Status).await.unwrap();
        let status: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(status, serde_json::json!({ "running": false }));
    }

    #[tokio::test]
    async fn test_engine_commands_without_engine_fail() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);

        let err = console.execute(ConsoleCommand::Stop).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InstanceNotFound)
        ));
        assert!(console.execute(ConsoleCommand::Export).await.is_err());
        assert!(
            console
                .execute(ConsoleCommand::Raw(r#""{\"command\":\"facts\"}""#.to_string()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_raw_input_must_be_json() {
        let dir = TempDir::new().unwrap();
        let err = console(&dir)
            .execute(ConsoleCommand::Raw("facts please".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_file_listings_work_without_engine() {
        let dir = TempDir::new().unwrap();
        let console = console(&dir);
        assert_eq!(console.execute(ConsoleCommand::States).await.unwrap(), "(none)");
        assert_eq!(
            console.execute(ConsoleCommand::Checkpoints).await.unwrap(),
            "(none)"
        );
        assert!(console.execute(ConsoleCommand::Delete("gone".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_without_engine_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        console(&dir).shutdown().await;
    }
}
