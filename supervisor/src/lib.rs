//! Supervisor for a single eFLINT reasoning server process.
//!
//! The crate owns three failure-prone resources: the engine's OS process,
//! the loopback TCP socket used for its line-delimited JSON protocol, and
//! the on-disk snapshots of its execution graph.
//!
//! ```text
//! StateManager ──(lifecycle lock, send_command)──> Manager ──> Instance (process + port)
//!      │                                               │
//!      └── {state_dir}/{name}.json                     └── 127.0.0.1:{port}, one line per command
//! ```

pub mod codec;
pub mod command;
pub mod shim;
pub mod types;

mod error;
mod instance;
mod launch;
mod manager;
mod state;

pub use error::{EngineError, StateError};
pub use instance::Instance;
pub use manager::Manager;
pub use shim::{EngineExportShim, ImportShim, PassthroughShim};
pub use state::{CHECKPOINT_PREFIX, SavedState, StateManager};
pub use types::{InstanceStatus, LifecycleReport, ManagerConfig};
