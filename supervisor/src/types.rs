//! Public types shared between the supervisor and its callers.
//!
//! Callers construct a [`ManagerConfig`], and read [`InstanceStatus`] and
//! [`LifecycleReport`] values. None of these hold references into the
//! manager; they are snapshots.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

const DEFAULT_SERVER_PATH: &str = "eflint-server";
const DEFAULT_MIN_PORT: u16 = 1025;
const DEFAULT_MAX_PORT: u16 = 65535;
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Launch and connection parameters for the engine process.
///
/// Fixed once handed to [`Manager::new`](crate::Manager::new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Engine executable, invoked as `executable_path <model> <port>`.
    pub executable_path: PathBuf,
    /// Inclusive lower bound of the port range.
    pub min_port: u16,
    /// Exclusive upper bound of the port range.
    pub max_port: u16,
    /// Budget for the readiness check after spawn.
    pub startup_timeout: Duration,
    /// Dial deadline and I/O deadline for each command.
    pub connection_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from(DEFAULT_SERVER_PATH),
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

/// Point-in-time view of the supervised instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl InstanceStatus {
    #[must_use]
    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Outcome of a lifecycle transition.
///
/// `warnings` collects problems that did not abort the transition, such as a
/// superseded process that refused to die. They are also logged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleReport {
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl LifecycleReport {
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
