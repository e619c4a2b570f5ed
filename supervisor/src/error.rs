//! Error taxonomy for the supervisor.
//!
//! [`EngineError`] covers process and protocol failures; [`StateError`] wraps
//! them for export/import and adds the file-store failures. Nothing here is
//! retried internally; every variant reaches the immediate caller.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No instance was ever installed, or `stop` cleared it.
    #[error("instance not found")]
    InstanceNotFound,

    /// An instance is on record but its process has exited.
    #[error("instance is not running")]
    InstanceNotRunning,

    #[error("failed to start engine process: {reason}")]
    ProcessStartFailed { reason: String },

    #[error("failed to stop engine process {pid:?}: {source}")]
    KillFailed {
        pid: Option<u32>,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to engine at {addr}: {source}")]
    ConnectionFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send command to engine: {source}")]
    CommandFailed {
        #[source]
        source: CodecError,
    },

    #[error("invalid response from engine: {reason}")]
    InvalidResponse { reason: String },

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    pub(crate) fn start_failed(reason: impl Into<String>) -> Self {
        Self::ProcessStartFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    /// Precondition failure from the manager (e.g. no running instance).
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to export engine state: {0}")]
    ExportFailed(#[source] EngineError),

    /// The load-export command could not be delivered or answered. The engine
    /// may have crashed and need a restart; nothing is restarted here.
    #[error("failed to import engine state (engine may need a restart): {0}")]
    ImportFailed(#[source] EngineError),

    #[error("engine rejected load-export: {message}")]
    Rejected { message: String },

    #[error("saved graph is not valid JSON: {0}")]
    MalformedGraph(#[source] serde_json::Error),

    #[error("invalid state name '{0}'")]
    InvalidName(String),

    #[error("saved state '{name}' not found")]
    NotFound { name: String },

    #[error("state file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed state file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    /// The engine-level failure underneath, if any.
    #[must_use]
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(e) | Self::ExportFailed(e) | Self::ImportFailed(e) => Some(e),
            _ => None,
        }
    }
}
