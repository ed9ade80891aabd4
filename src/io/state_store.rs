//! Durable storage for the workflow coordination document.
//!
//! One JSON document on disk is the authoritative coordination state. Writes
//! are atomic (temp file + rename) so a crash mid-save never leaves a
//! truncated document, and every read-modify-write runs under a process-wide
//! mutex released on all exit paths. A missing or corrupt document is
//! self-healing: load falls back to the empty skeleton with a warning rather
//! than failing the run.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::WorkflowState;

/// Embedded schema for the state document (Draft 2020-12).
const STATE_SCHEMA: &str = include_str!("../../schemas/workflow_state/v1.schema.json");

static STATE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(STATE_SCHEMA).expect("embedded workflow state schema parses");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded workflow state schema compiles")
});

/// Process-wide lock over the state document. Stores are cheap handles and
/// callers may hold several on the same path, so serialization must not be
/// per-instance: every load/save/update in the process contends here, which
/// also keeps the shared `.json.tmp` name race-free.
static STATE_LOCK: Mutex<()> = Mutex::new(());

/// Persistence for the single [`WorkflowState`] document.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state document, healing missing or corrupt content to the
    /// empty skeleton.
    pub fn load(&self) -> Result<WorkflowState> {
        let _guard = self.lock();
        self.load_locked()
    }

    /// Atomically persist `state` (temp file + rename).
    pub fn save(&self, state: &WorkflowState) -> Result<()> {
        let _guard = self.lock();
        self.save_locked(state)
    }

    /// Overwrite the document with the empty skeleton
    /// `{todo: [], done: [], files: {}}`. Used once at the start of each run
    /// so state never bleeds across runs.
    pub fn reset(&self) -> Result<WorkflowState> {
        let _guard = self.lock();
        let state = WorkflowState::default();
        self.save_locked(&state)?;
        debug!(path = %self.path.display(), "state reset to empty skeleton");
        Ok(state)
    }

    /// Scoped read-modify-write: load, apply `f`, save, all under the lock.
    pub fn update<T>(&self, f: impl FnOnce(&mut WorkflowState) -> T) -> Result<T> {
        let _guard = self.lock();
        let mut state = self.load_locked()?;
        let out = f(&mut state);
        self.save_locked(&state)?;
        Ok(out)
    }

    fn load_locked(&self) -> Result<WorkflowState> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state document, starting empty");
                return Ok(WorkflowState::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read state {}", self.path.display()));
            }
        };
        Ok(parse_or_heal(&contents, &self.path))
    }

    fn save_locked(&self, state: &WorkflowState) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(state)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    fn lock(&self) -> std::sync::MutexGuard<'static, ()> {
        STATE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse and schema-check the document; any corruption heals to empty.
fn parse_or_heal(contents: &str, path: &Path) -> WorkflowState {
    let value: Value = match serde_json::from_str(contents) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "state document unparsable, reinitializing");
            return WorkflowState::default();
        }
    };

    let schema_errors: Vec<String> = STATE_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !schema_errors.is_empty() {
        warn!(
            path = %path.display(),
            errors = %schema_errors.join("; "),
            "state document failed schema validation, reinitializing"
        );
        return WorkflowState::default();
    }

    match serde_json::from_value(value) {
        Ok(state) => state,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "state document undeserializable, reinitializing");
            WorkflowState::default()
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ledger, todo};
    use chrono::Utc;

    fn store_in(temp: &tempfile::TempDir) -> StateStore {
        StateStore::new(temp.path().join("workspace/.workflow_state.json"))
    }

    #[test]
    fn load_missing_returns_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        assert_eq!(store.load().expect("load"), WorkflowState::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut state = WorkflowState::default();
        todo::add(&mut state, "write design doc");
        ledger::record(&mut state, "requirements.md", "pm_task", Utc::now());
        store.save(&state).expect("save");

        assert_eq!(store.load().expect("load"), state);
    }

    #[test]
    fn reset_writes_empty_skeleton() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut state = WorkflowState::default();
        todo::add(&mut state, "stale work");
        store.save(&state).expect("save");

        store.reset().expect("reset");
        let loaded = store.load().expect("load");
        assert!(loaded.todo.is_empty());
        assert!(loaded.done.is_empty());
        assert!(loaded.files.is_empty());

        let raw = fs::read_to_string(store.path()).expect("read raw");
        let value: Value = serde_json::from_str(&raw).expect("parse raw");
        assert_eq!(
            value,
            serde_json::json!({"todo": [], "done": [], "files": {}})
        );
    }

    #[test]
    fn corrupt_json_heals_to_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::create_dir_all(temp.path().join("workspace")).expect("mkdir");
        fs::write(store.path(), "{ not json at all").expect("write corrupt");

        assert_eq!(store.load().expect("load"), WorkflowState::default());
    }

    #[test]
    fn schema_violation_heals_to_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::create_dir_all(temp.path().join("workspace")).expect("mkdir");
        // Valid JSON, wrong shape: todo must be an array.
        fs::write(
            store.path(),
            "{\"todo\": 7, \"done\": [], \"files\": {}}",
        )
        .expect("write invalid");

        assert_eq!(store.load().expect("load"), WorkflowState::default());
    }

    #[test]
    fn update_persists_mutation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let item = store
            .update(|state| todo::add(state, "write design doc"))
            .expect("update");
        assert_eq!(item.id, 1);

        let loaded = store.load().expect("load");
        assert_eq!(loaded.todo.len(), 1);
        assert_eq!(loaded.todo[0].description, "write design doc");
    }

    #[test]
    fn concurrent_updates_through_separate_handles_lose_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workspace/.workflow_state.json");
        const PER_THREAD: usize = 50;

        std::thread::scope(|scope| {
            for _ in 0..2 {
                let path = path.clone();
                scope.spawn(move || {
                    // Each thread owns its own handle on the same document.
                    let store = StateStore::new(path);
                    for i in 0..PER_THREAD {
                        store
                            .update(|state| todo::add(state, &format!("item {i}")))
                            .expect("update");
                    }
                });
            }
        });

        let store = StateStore::new(path);
        let state = store.load().expect("load");
        assert_eq!(state.todo.len(), 2 * PER_THREAD, "updates lost");
        let mut ids: Vec<u64> = state.todo.iter().map(|item| item.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 2 * PER_THREAD, "duplicate ids assigned");
    }

    #[test]
    fn no_temp_file_left_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store.reset().expect("reset");
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}
