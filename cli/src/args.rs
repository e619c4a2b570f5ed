use std::path::PathBuf;

use anyhow::{Result, bail};

pub const USAGE: &str = "\
usage: eflintd [--config <path>] [--no-auto-start]

  --config <path>    read configuration from <path>
  --no-auto-start    do not start the configured model on launch
  -h, --help         print this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub auto_start: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    Run(Args),
    Help,
}

pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Invocation> {
    let mut parsed = Args {
        config: None,
        auto_start: true,
    };
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "--no-auto-start" => parsed.auto_start = false,
            "--config" => match args.next() {
                Some(path) => parsed.config = Some(PathBuf::from(path)),
                None => bail!("--config requires a path"),
            },
            other => match other.strip_prefix("--config=") {
                Some(path) if !path.is_empty() => parsed.config = Some(PathBuf::from(path)),
                _ => bail!("unexpected argument '{other}'"),
            },
        }
    }

    Ok(Invocation::Run(parsed))
}
