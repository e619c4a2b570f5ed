//! Handle around one running engine process.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::time::{Instant, sleep};

/// Interval between liveness polls while waiting for a killed process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One supervised run of the engine, bound to a port and a model.
///
/// Port and model never change for the lifetime of the handle. The child
/// process is killed when the handle is dropped.
#[derive(Debug)]
pub struct Instance {
    port: u16,
    model_location: String,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl Instance {
    pub(crate) fn new(port: u16, child: Child, model_location: impl Into<String>) -> Self {
        Self {
            port,
            model_location: model_location.into(),
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff the process has not been observed to exit.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        match self.child().try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::trace!(pid = ?self.pid, %status, "Engine process has exited");
                false
            }
            Err(e) => {
                tracing::warn!(pid = ?self.pid, "Failed to poll engine process: {e}");
                false
            }
        }
    }

    /// Request termination. Succeeds if the process is already gone.
    pub fn kill(&self) -> io::Result<()> {
        let mut child = self.child();
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        match child.start_kill() {
            Ok(()) => Ok(()),
            // tokio reports InvalidInput once the child has been reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Poll until the process exits or `timeout` elapses. Returns whether it exited.
    pub(crate) async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn model_location(&self) -> &str {
        &self.model_location
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}
