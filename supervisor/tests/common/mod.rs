//! Shared fixtures for integration tests that drive the `eflint-stub` engine.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eflint_supervisor::{Manager, ManagerConfig};
use tempfile::TempDir;
use tokio::time::{Instant, sleep};

pub const MODEL_SOURCE: &str = "Fact person\n+person(alice).\n+person(bob).\n";

pub fn stub_config() -> ManagerConfig {
    ManagerConfig {
        executable_path: PathBuf::from(env!("CARGO_BIN_EXE_eflint-stub")),
        min_port: 20000,
        max_port: 60000,
        startup_timeout: Duration::from_secs(10),
        connection_timeout: Duration::from_secs(5),
    }
}

pub fn write_model(dir: &Path, name: &str, source: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path.to_string_lossy().into_owned()
}

/// A temp directory holding one model file, plus a manager pointed at the stub.
pub struct Fixture {
    pub dir: TempDir,
    pub model: String,
    pub manager: Arc<Manager>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(stub_config())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let model = write_model(dir.path(), "policy.eflint", MODEL_SOURCE);
        Self {
            dir,
            model,
            manager: Arc::new(Manager::new(config)),
        }
    }
}

/// Poll until the manager reports the engine as gone.
pub async fn wait_until_stopped(manager: &Manager) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !manager.is_running() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}
