//! TOML configuration for `eflintd`.
//!
//! Lookup order for the file: an explicit path, then `$EFLINT_CONFIG`, then
//! `~/.eflint/config.toml`. A missing file yields defaults; a file that
//! exists but cannot be read or parsed is an error. String values may
//! reference environment variables as `${VAR}`. `EFLINT_SERVER_PATH` and
//! `EFLINT_MODEL_PATH` override the file.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eflint_supervisor::ManagerConfig;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "EFLINT_CONFIG";
pub const SERVER_PATH_ENV: &str = "EFLINT_SERVER_PATH";
pub const MODEL_PATH_ENV: &str = "EFLINT_MODEL_PATH";

const DEFAULT_STATE_DIR: &str = "eflint-states";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EflintConfig {
    pub engine: EngineConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub server_path: String,
    /// Policy model started automatically by the console.
    pub model_path: Option<String>,
    pub min_port: u16,
    /// Exclusive upper bound.
    pub max_port: u16,
    pub startup_timeout_ms: u64,
    pub connection_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = ManagerConfig::default();
        Self {
            server_path: defaults.executable_path.to_string_lossy().into_owned(),
            model_path: None,
            min_port: defaults.min_port,
            max_port: defaults.max_port,
            startup_timeout_ms: duration_ms(defaults.startup_timeout),
            connection_timeout_ms: duration_ms(defaults.connection_timeout),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    pub dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_STATE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<String>,
}

/// Replace `${VAR}` with the value of `VAR`, or nothing if unset.
///
/// An unclosed `${` is kept literally.
pub fn expand_env_vars(value: &str) -> String {
    expand_env_vars_with(value, |var| env::var(var).ok())
}

pub fn expand_env_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        let end = start + 2 + end_rel;
        out.push_str(&rest[..start]);

        let var = &rest[start + 2..end];
        if !var.is_empty()
            && let Some(replacement) = lookup(var)
        {
            out.push_str(&replacement);
        }
        rest = &rest[end + 1..];
    }

    out.push_str(rest);
    out
}

/// `~` or `~/...` relative to the home directory; anything else as-is.
fn expand_home(path: &str) -> PathBuf {
    let home_relative = path
        .strip_prefix("~/")
        .or_else(|| (path == "~").then_some(""));
    match (home_relative, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// `~/.eflint/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".eflint").join("config.toml"))
}

impl EflintConfig {
    /// Resolve the config file, read it, and apply the environment.
    ///
    /// An explicit path must exist; the other candidates are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (Some(path.to_path_buf()), true),
            None => match env::var_os(CONFIG_ENV) {
                Some(path) => (Some(PathBuf::from(path)), true),
                None => (config_path(), false),
            },
        };

        let mut config = match path {
            Some(path) if required || path.exists() => Self::from_file(&path)?,
            _ => {
                tracing::debug!("No config file found; using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|var| env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let config = Self::from_toml_str(&content, |var| env::var(var).ok()).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse TOML and expand `${VAR}` references through `lookup`.
    pub fn from_toml_str(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_with(lookup);
        Ok(config)
    }

    fn expand_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let expand = |value: &mut String| *value = expand_env_vars_with(value, &lookup);

        expand(&mut self.engine.server_path);
        if let Some(model) = self.engine.model_path.as_mut() {
            expand(model);
        }
        expand(&mut self.state.dir);
        if let Some(dir) = self.logging.dir.as_mut() {
            expand(dir);
        }
    }

    /// Apply `EFLINT_SERVER_PATH` and `EFLINT_MODEL_PATH`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |var: &str| lookup(var).filter(|value: &String| !value.trim().is_empty());

        if let Some(server) = lookup(SERVER_PATH_ENV) {
            self.engine.server_path = server;
        }
        if let Some(model) = lookup(MODEL_PATH_ENV) {
            self.engine.model_path = Some(model);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });
        let engine = &self.engine;

        if engine.server_path.trim().is_empty() {
            return invalid("engine.server_path is empty".to_string());
        }
        if engine.min_port == 0 || engine.min_port >= engine.max_port {
            return invalid(format!(
                "engine port range [{}, {}) is empty or starts at 0",
                engine.min_port, engine.max_port
            ));
        }
        if engine.startup_timeout_ms == 0 {
            return invalid("engine.startup_timeout_ms must be positive".to_string());
        }
        if engine.connection_timeout_ms == 0 {
            return invalid("engine.connection_timeout_ms must be positive".to_string());
        }
        if self.state.dir.trim().is_empty() {
            return invalid("state.dir is empty".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            executable_path: expand_home(&self.engine.server_path),
            min_port: self.engine.min_port,
            max_port: self.engine.max_port,
            startup_timeout: Duration::from_millis(self.engine.startup_timeout_ms),
            connection_timeout: Duration::from_millis(self.engine.connection_timeout_ms),
        }
    }

    #[must_use]
    pub fn model_path(&self) -> Option<&str> {
        self.engine
            .model_path
            .as_deref()
            .filter(|model| !model.trim().is_empty())
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.state.dir)
    }

    /// Configured log directory, else `~/.eflint/logs`.
    #[must_use]
    pub fn log_dir(&self) -> Option<PathBuf> {
        match self.logging.dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => Some(expand_home(dir)),
            _ => config_path()
                .as_deref()
                .and_then(Path::parent)
                .map(|dir| dir.join("logs")),
        }
    }
}
