//! Port selection, process spawn, and readiness probing.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Instant, sleep};

use crate::error::EngineError;
use crate::instance::Instance;
use crate::types::ManagerConfig;

/// Upper bound on random draws before giving up on finding a free port.
const MAX_PORT_ATTEMPTS: usize = 16;

const READY_INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const READY_MAX_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Draw a port from `[min_port, max_port)` that can currently be bound on loopback.
///
/// The trial listener is dropped before returning, so another process can
/// still take the port before the engine binds it; spawn/readiness failures
/// cover that window.
pub(crate) fn pick_port(config: &ManagerConfig) -> Result<u16, EngineError> {
    if config.min_port >= config.max_port {
        return Err(EngineError::start_failed(format!(
            "empty port range [{}, {})",
            config.min_port, config.max_port
        )));
    }

    let span = config.max_port - config.min_port;
    for attempt in 1..=MAX_PORT_ATTEMPTS {
        let port = config.min_port + rand::random::<u16>() % span;
        match TcpListener::bind(loopback(port)) {
            Ok(listener) => {
                drop(listener);
                return Ok(port);
            }
            Err(e) => {
                tracing::debug!(port, attempt, "Port unavailable: {e}");
            }
        }
    }

    Err(EngineError::start_failed(format!(
        "no free port in [{}, {}) after {MAX_PORT_ATTEMPTS} attempts",
        config.min_port, config.max_port
    )))
}

/// Spawn the engine as `executable <model> <port>` and wait until it accepts connections.
pub(crate) async fn spawn_engine(
    config: &ManagerConfig,
    model_location: &str,
    port: u16,
) -> Result<Instance, EngineError> {
    tracing::info!(
        path = %config.executable_path.display(),
        model = model_location,
        port,
        "Starting eFLINT server"
    );

    let child = Command::new(&config.executable_path)
        .arg(model_location)
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            EngineError::start_failed(format!(
                "spawning {}: {e}",
                config.executable_path.display()
            ))
        })?;

    let instance = Instance::new(port, child, model_location);

    if let Err(e) = wait_until_ready(&instance, config.startup_timeout).await {
        if let Err(kill_err) = instance.kill() {
            tracing::warn!(pid = ?instance.pid(), "Failed to kill unready engine: {kill_err}");
        }
        return Err(e);
    }

    tracing::info!(pid = ?instance.pid(), port, "eFLINT server accepting connections");
    Ok(instance)
}

/// Dial the instance's port with exponential backoff until it accepts a
/// connection, the process exits, or `timeout` elapses.
async fn wait_until_ready(instance: &Instance, timeout: Duration) -> Result<(), EngineError> {
    let addr = loopback(instance.port());
    let deadline = Instant::now() + timeout;
    let mut backoff = READY_INITIAL_BACKOFF;

    loop {
        if !instance.is_alive() {
            return Err(EngineError::start_failed(
                "engine process exited before accepting connections",
            ));
        }

        match TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(e) => tracing::trace!(%addr, "Engine not ready yet: {e}"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(EngineError::start_failed(format!(
                "engine did not accept connections on {addr} within {timeout:?}"
            )));
        }

        sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(READY_MAX_BACKOFF);
    }
}
