//! Export/import of the engine's execution graph and file-backed checkpoints.
//!
//! # Storage
//!
//! One file per saved state at `{state_dir}/{name}.json`, holding an
//! indented [`SavedState`]. Checkpoints are saved states whose file name
//! starts with [`CHECKPOINT_PREFIX`]. Writes go through a temp file in the
//! same directory and a rename, so readers never see a truncated file;
//! concurrent writers of one name still race (last rename wins).
//!
//! # Locking
//!
//! Reads (`get_state`, `export_state`) share this manager's lock. An import
//! holds it exclusively and also holds the [`Manager`] lifecycle lock for the
//! whole transform+send, so it cannot interleave with a stop or restart.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;

use crate::command;
use crate::error::{EngineError, StateError};
use crate::manager::Manager;
use crate::shim::{EngineExportShim, ImportShim};

pub const CHECKPOINT_PREFIX: &str = "checkpoint-";

const STATE_FILE_EXTENSION: &str = "json";

/// A captured execution graph plus the metadata needed to restore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedState {
    pub id: String,
    pub model_location: String,
    /// The engine's export, kept byte-for-byte.
    pub graph: Box<RawValue>,
    pub saved_at: DateTime<Utc>,
}

impl SavedState {
    fn generate_id(now: DateTime<Utc>) -> String {
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        format!("state-{nanos}")
    }
}

pub struct StateManager {
    manager: Arc<Manager>,
    state_dir: PathBuf,
    shim: Box<dyn ImportShim>,
    lock: RwLock<()>,
}

impl StateManager {
    /// Create a state manager storing files under `state_dir`.
    ///
    /// The directory is created if missing. Failure is logged; file
    /// operations report it later.
    pub fn new(manager: Arc<Manager>, state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        if let Err(e) = fs::create_dir_all(&state_dir) {
            tracing::warn!(dir = %state_dir.display(), "Failed to create state directory: {e}");
        }

        Self {
            manager,
            state_dir,
            shim: Box::new(EngineExportShim),
            lock: RwLock::new(()),
        }
    }

    /// Replace the compatibility shim applied on import.
    #[must_use]
    pub fn with_shim(mut self, shim: impl ImportShim + 'static) -> Self {
        self.shim = Box::new(shim);
        self
    }

    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    fn require_running(&self) -> Result<(), StateError> {
        if self.manager.is_running() {
            Ok(())
        } else {
            Err(EngineError::InstanceNotRunning.into())
        }
    }

    /// Raw `create-export` response, unmodified.
    pub async fn get_state(&self) -> Result<String, StateError> {
        let _read = self.lock.read().await;
        self.require_running()?;
        Ok(self.manager.get_state().await?)
    }

    /// Export the current graph as a [`SavedState`].
    pub async fn export_state(&self) -> Result<SavedState, StateError> {
        let _read = self.lock.read().await;
        self.require_running()?;

        let response = self
            .manager
            .get_state()
            .await
            .map_err(StateError::ExportFailed)?;
        let graph = RawValue::from_string(response).map_err(|e| {
            StateError::ExportFailed(EngineError::invalid_response(format!(
                "export is not valid JSON: {e}"
            )))
        })?;

        let saved_at = Utc::now();
        let state = SavedState {
            id: SavedState::generate_id(saved_at),
            model_location: self.manager.status().model_location.unwrap_or_default(),
            graph,
            saved_at,
        };

        tracing::info!(id = %state.id, model = %state.model_location, "Exported eFLINT state");
        Ok(state)
    }

    /// Load `saved` into the running engine via `load-export`.
    ///
    /// A failed send is reported as [`StateError::ImportFailed`]; the engine
    /// is not restarted here.
    pub async fn import_state(&self, saved: &SavedState) -> Result<(), StateError> {
        let _write = self.lock.write().await;
        let _lifecycle = self.manager.lock_lifecycle().await;
        self.require_running()?;

        let graph = serde_json::from_str(saved.graph.get()).map_err(StateError::MalformedGraph)?;
        let graph = self.shim.transform(graph);
        let load = command::load_export(&graph);

        tracing::debug!(
            id = %saved.id,
            shim = self.shim.name(),
            original_bytes = saved.graph.get().len(),
            command_bytes = load.len(),
            "Sending load-export"
        );

        let response = match self.manager.send_command(&load).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    id = %saved.id,
                    model = %saved.model_location,
                    "load-export failed; engine may need a restart: {e}"
                );
                return Err(StateError::ImportFailed(e));
            }
        };

        if let Some(message) = command::rejection_message(&response) {
            tracing::warn!(id = %saved.id, "Engine rejected load-export: {message}");
            return Err(StateError::Rejected { message });
        }

        tracing::info!(id = %saved.id, "Imported eFLINT state");
        Ok(())
    }

    fn state_path(&self, name: &str) -> Result<PathBuf, StateError> {
        validate_name(name)?;
        Ok(self
            .state_dir
            .join(format!("{name}.{STATE_FILE_EXTENSION}")))
    }

    /// Export and persist under `name`.
    pub async fn save_state_to_file(&self, name: &str) -> Result<SavedState, StateError> {
        let path = self.state_path(name)?;
        let state = self.export_state().await?;

        let json = serde_json::to_vec_pretty(&state).map_err(|source| StateError::Json {
            path: path.clone(),
            source,
        })?;
        write_replacing(&self.state_dir, &path, &json).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(file = %path.display(), id = %state.id, "Saved state to file");
        Ok(state)
    }

    /// Read a persisted state without importing it.
    pub fn read_saved_state(&self, name: &str) -> Result<SavedState, StateError> {
        let path = self.state_path(name)?;
        let bytes = fs::read(&path).map_err(|source| not_found_or_io(name, path.clone(), source))?;
        serde_json::from_slice(&bytes).map_err(|source| StateError::Json { path, source })
    }

    /// Read the state saved under `name` and import it.
    pub async fn load_state_from_file(&self, name: &str) -> Result<(), StateError> {
        let state = self.read_saved_state(name)?;
        tracing::info!(name, id = %state.id, "Loading state from file");
        self.import_state(&state).await
    }

    /// Names of all saved states (checkpoints included), sorted.
    pub fn list_saved_states(&self) -> Result<Vec<String>, StateError> {
        let io_err = |source| StateError::Io {
            path: self.state_dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.state_dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(STATE_FILE_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete_saved_state(&self, name: &str) -> Result<(), StateError> {
        let path = self.state_path(name)?;
        fs::remove_file(&path).map_err(|source| not_found_or_io(name, path.clone(), source))?;
        tracing::info!(file = %path.display(), "Deleted state file");
        Ok(())
    }

    pub async fn create_checkpoint(&self, name: &str) -> Result<SavedState, StateError> {
        self.save_state_to_file(&checkpoint_file_name(name)?).await
    }

    pub async fn restore_checkpoint(&self, name: &str) -> Result<(), StateError> {
        self.load_state_from_file(&checkpoint_file_name(name)?).await
    }

    /// Checkpoint names, prefix stripped.
    pub fn list_checkpoints(&self) -> Result<Vec<String>, StateError> {
        Ok(self
            .list_saved_states()?
            .into_iter()
            .filter_map(|name| {
                name.strip_prefix(CHECKPOINT_PREFIX)
                    .filter(|rest| !rest.is_empty())
                    .map(ToString::to_string)
            })
            .collect())
    }

    pub fn delete_checkpoint(&self, name: &str) -> Result<(), StateError> {
        self.delete_saved_state(&checkpoint_file_name(name)?)
    }
}

/// The bare name is validated too, so `checkpoint-` alone never becomes a file.
fn checkpoint_file_name(name: &str) -> Result<String, StateError> {
    validate_name(name)?;
    Ok(format!("{CHECKPOINT_PREFIX}{name}"))
}

/// Names become file stems, so they must stay inside the state directory.
fn validate_name(name: &str) -> Result<(), StateError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StateError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn not_found_or_io(name: &str, path: PathBuf, source: io::Error) -> StateError {
    if source.kind() == io::ErrorKind::NotFound {
        StateError::NotFound {
            name: name.to_string(),
        }
    } else {
        StateError::Io { path, source }
    }
}

/// Temp file in `dir`, then rename over `path`.
fn write_replacing(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::ManagerConfig;

    fn state_manager(dir: &Path) -> StateManager {
        StateManager::new(Arc::new(Manager::new(ManagerConfig::default())), dir)
    }

    fn sample_state(id: &str) -> SavedState {
        SavedState {
            id: id.to_string(),
            model_location: "/models/m.eflint".to_string(),
            graph: RawValue::from_string(r#"{"current":1,"edges":[],"nodes":[]}"#.to_string())
                .unwrap(),
            saved_at: Utc::now(),
        }
    }

    fn write_state(sm: &StateManager, name: &str, state: &SavedState) {
        let path = sm.state_path(name).unwrap();
        fs::write(path, serde_json::to_vec_pretty(state).unwrap()).unwrap();
    }

    #[test]
    fn test_new_creates_state_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("states");
        let sm = state_manager(&dir);
        assert!(dir.is_dir());
        assert_eq!(sm.state_dir(), dir);
        assert!(sm.list_saved_states().unwrap().is_empty());
    }

    #[test]
    fn test_list_filters_json_and_checkpoints() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        write_state(&sm, "alpha", &sample_state("state-1"));
        write_state(&sm, "checkpoint-before", &sample_state("state-2"));
        write_state(&sm, "checkpoint-", &sample_state("state-3"));
        fs::write(tmp.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(tmp.path().join("dir.json")).unwrap();

        assert_eq!(
            sm.list_saved_states().unwrap(),
            vec!["alpha", "checkpoint-", "checkpoint-before"]
        );
        assert_eq!(sm.list_checkpoints().unwrap(), vec!["before"]);
    }

    #[test]
    fn test_saved_state_file_layout() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        let state = sample_state("state-42");
        write_state(&sm, "layout", &state);

        let text = fs::read_to_string(tmp.path().join("layout.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["id", "model_location", "graph", "saved_at"]);
        assert!(text.contains("\n  \"id\": \"state-42\""));

        let read = sm.read_saved_state("layout").unwrap();
        assert_eq!(read.id, "state-42");
        assert_eq!(read.graph.get(), state.graph.get());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        assert!(matches!(
            sm.delete_saved_state("ghost"),
            Err(StateError::NotFound { name }) if name == "ghost"
        ));
        assert!(matches!(
            sm.delete_checkpoint("ghost"),
            Err(StateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_removes_file() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        write_state(&sm, "checkpoint-x", &sample_state("state-1"));

        sm.delete_checkpoint("x").unwrap();
        assert!(sm.list_checkpoints().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        fs::write(tmp.path().join("broken.json"), "{ nope").unwrap();
        assert!(matches!(
            sm.read_saved_state("broken"),
            Err(StateError::Json { .. })
        ));
    }

    #[test]
    fn test_names_cannot_escape_state_dir() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        for name in ["", "  ", "..", "../up", "a/b", "a\\b"] {
            assert!(
                matches!(sm.delete_saved_state(name), Err(StateError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_write_replacing_overwrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.json");
        write_replacing(tmp.path(), &path, b"first").unwrap();
        write_replacing(tmp.path(), &path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_generated_ids_are_time_based() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 5).unwrap();
        assert_eq!(SavedState::generate_id(at), "state-1700000000000000005");
    }

    #[tokio::test]
    async fn test_operations_require_running_engine() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());

        assert!(matches!(
            sm.get_state().await,
            Err(StateError::Engine(EngineError::InstanceNotRunning))
        ));
        assert!(matches!(
            sm.export_state().await,
            Err(StateError::Engine(EngineError::InstanceNotRunning))
        ));
        assert!(matches!(
            sm.import_state(&sample_state("state-1")).await,
            Err(StateError::Engine(EngineError::InstanceNotRunning))
        ));
        assert!(matches!(
            sm.create_checkpoint("x").await,
            Err(StateError::Engine(EngineError::InstanceNotRunning))
        ));
        assert!(sm.list_saved_states().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_missing_checkpoint_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());
        assert!(matches!(
            sm.restore_checkpoint("nope").await,
            Err(StateError::NotFound { name }) if name == "checkpoint-nope"
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_names_are_validated_before_prefixing() {
        let tmp = TempDir::new().unwrap();
        let sm = state_manager(tmp.path());

        for name in ["", " ", "..", "a/b"] {
            assert!(matches!(
                sm.create_checkpoint(name).await,
                Err(StateError::InvalidName(_))
            ));
            assert!(matches!(
                sm.restore_checkpoint(name).await,
                Err(StateError::InvalidName(_))
            ));
            assert!(matches!(
                sm.delete_checkpoint(name),
                Err(StateError::InvalidName(_))
            ));
        }
        assert!(!tmp.path().join("checkpoint-.json").exists());
        assert!(sm.list_saved_states().unwrap().is_empty());
    }
}
