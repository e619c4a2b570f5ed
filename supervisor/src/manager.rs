//! Single-instance supervisor and synchronous command channel.
//!
//! Lifecycle transitions (start, stop, restart, model update) hold the
//! lifecycle lock for their whole duration, so they are strictly ordered.
//! The instance slot has its own short-lived lock: readers copy the current
//! `Arc<Instance>` out and release it, so a command in flight never blocks a
//! restart. Such a command may finish against the superseded instance.

use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use crate::codec::{CodecError, LineReader, LineWriter};
use crate::command;
use crate::error::EngineError;
use crate::instance::Instance;
use crate::launch::{self, loopback};
use crate::types::{InstanceStatus, LifecycleReport, ManagerConfig};

/// How long a killed process gets to exit before it is reported as lingering.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Commands and responses longer than this are truncated in debug logs.
const LOG_PREVIEW_CHARS: usize = 200;

fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct Manager {
    config: ManagerConfig,
    slot: RwLock<Option<Arc<Instance>>>,
    lifecycle: Mutex<()>,
}

impl Manager {
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Serialize with lifecycle transitions. Held by the state manager while importing.
    pub(crate) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    fn current(&self) -> Option<Arc<Instance>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take(&self) -> Option<Arc<Instance>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn install(&self, instance: Arc<Instance>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(instance);
    }

    /// Start the engine with `model_location`, superseding any current instance.
    pub async fn start(&self, model_location: &str) -> Result<LifecycleReport, EngineError> {
        let _guard = self.lifecycle.lock().await;
        self.relaunch(model_location, "started").await
    }

    /// Kill the current instance and clear it.
    pub async fn stop(&self) -> Result<LifecycleReport, EngineError> {
        let _guard = self.lifecycle.lock().await;

        let instance = self.take().ok_or(EngineError::InstanceNotFound)?;
        if let Err(source) = instance.kill() {
            let pid = instance.pid();
            // Keep the handle on record so the caller can retry.
            self.install(instance);
            return Err(EngineError::KillFailed { pid, source });
        }

        let mut warnings = Vec::new();
        if !instance.wait_for_exit(KILL_WAIT).await {
            let warning = format!(
                "engine process {:?} still alive {KILL_WAIT:?} after kill",
                instance.pid()
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
        }

        tracing::info!(port = instance.port(), "Stopped eFLINT server");
        Ok(LifecycleReport {
            status: InstanceStatus::stopped(),
            warnings,
        })
    }

    /// Relaunch with the current instance's model on a new port.
    pub async fn restart(&self) -> Result<LifecycleReport, EngineError> {
        let _guard = self.lifecycle.lock().await;
        let model = self
            .current()
            .ok_or(EngineError::InstanceNotFound)?
            .model_location()
            .to_string();
        self.relaunch(&model, "restarted").await
    }

    /// Relaunch with a different model (hot-swapping the policy model).
    ///
    /// Like `start`, this does not require an existing instance.
    pub async fn update_model(&self, model_location: &str) -> Result<LifecycleReport, EngineError> {
        let _guard = self.lifecycle.lock().await;
        self.relaunch(model_location, "updated model of").await
    }

    /// Supersede the current instance and launch a new one. Caller holds the lifecycle lock.
    ///
    /// The superseded instance stays in the slot until the replacement is
    /// installed, so concurrent commands see the old instance (dead) or the
    /// new one. A failed launch clears the slot.
    async fn relaunch(
        &self,
        model_location: &str,
        verb: &'static str,
    ) -> Result<LifecycleReport, EngineError> {
        let warnings = match self.current() {
            Some(previous) => Self::supersede(&previous).await,
            None => Vec::new(),
        };

        let launched = match launch::pick_port(&self.config) {
            Ok(port) => launch::spawn_engine(&self.config, model_location, port)
                .await
                .map(|instance| (port, instance)),
            Err(e) => Err(e),
        };
        let (port, instance) = match launched {
            Ok((port, instance)) => (port, Arc::new(instance)),
            Err(e) => {
                self.take();
                return Err(e);
            }
        };
        let status = InstanceStatus {
            running: true,
            port: Some(port),
            model_location: Some(model_location.to_string()),
            pid: instance.pid(),
        };
        self.install(instance);

        tracing::info!(port, model = model_location, "{verb} eFLINT server");
        Ok(LifecycleReport { status, warnings })
    }

    /// Kill a superseded instance. Problems become warnings, never errors:
    /// the following spawn decides the outcome.
    async fn supersede(previous: &Instance) -> Vec<String> {
        if !previous.is_alive() {
            return Vec::new();
        }

        let mut warnings = Vec::new();
        match previous.kill() {
            Ok(()) => {
                if !previous.wait_for_exit(KILL_WAIT).await {
                    warnings.push(format!(
                        "superseded engine process {:?} still alive {KILL_WAIT:?} after kill",
                        previous.pid()
                    ));
                }
            }
            Err(e) => warnings.push(format!(
                "failed to kill superseded engine process {:?}: {e}",
                previous.pid()
            )),
        }

        for warning in &warnings {
            tracing::warn!(port = previous.port(), "{warning}");
        }
        warnings
    }

    /// Value snapshot of the current instance.
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        match self.current() {
            Some(instance) => InstanceStatus {
                running: instance.is_alive(),
                port: Some(instance.port()),
                model_location: Some(instance.model_location().to_string()),
                pid: instance.pid(),
            },
            None => InstanceStatus::stopped(),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current().is_some_and(|instance| instance.is_alive())
    }

    /// Send one command line and return the trimmed response line.
    ///
    /// Opens a fresh connection per command. `connection_timeout` bounds the
    /// dial and, separately, the write+read exchange.
    pub async fn send_command(&self, command: &str) -> Result<String, EngineError> {
        let instance = self.current().ok_or(EngineError::InstanceNotFound)?;
        if !instance.is_alive() {
            return Err(EngineError::InstanceNotRunning);
        }

        let addr = loopback(instance.port());
        let deadline = self.config.connection_timeout;

        let stream = match timeout(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(EngineError::ConnectionFailed { addr, source }),
            Err(_) => {
                return Err(EngineError::ConnectionFailed {
                    addr,
                    source: io::ErrorKind::TimedOut.into(),
                });
            }
        };

        let response = timeout(deadline, Self::exchange(stream, command))
            .await
            .map_err(|_| EngineError::Timeout(deadline))??;

        let response = response.trim().to_string();
        tracing::debug!(
            command = preview(command),
            response = preview(&response),
            "Sent command to eFLINT server"
        );
        Ok(response)
    }

    async fn exchange(stream: TcpStream, command: &str) -> Result<String, EngineError> {
        let (read_half, write_half) = stream.into_split();

        LineWriter::new(write_half)
            .write_line(command)
            .await
            .map_err(|source| EngineError::CommandFailed { source })?;

        match LineReader::new(read_half).read_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(EngineError::invalid_response(
                "connection closed before a response line",
            )),
            Err(CodecError::Io(source)) => Err(EngineError::CommandFailed {
                source: CodecError::Io(source),
            }),
            Err(e) => Err(EngineError::invalid_response(e.to_string())),
        }
    }

    /// Raw execution graph via `create-export`.
    pub async fn get_state(&self) -> Result<String, EngineError> {
        self.send_command(&command::create_export()).await
    }

    /// The engine's own `status` report.
    pub async fn engine_status(&self) -> Result<String, EngineError> {
        self.send_command(&command::status()).await
    }
}
