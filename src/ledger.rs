//! Persistent artifact-to-producer attribution.

use anyhow::Result;
use chrono::Utc;

use crate::core::ledger;
use crate::core::types::FileRecord;
use crate::io::state_store::StateStore;

/// Mapping from artifact filename to its producer, backed by the shared
/// state document.
pub struct ArtifactLedger<'a> {
    store: &'a StateStore,
}

impl<'a> ArtifactLedger<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Record that `creator_task` produced (or rewrote) `filename`.
    ///
    /// First writer wins for attribution: only `last_modified` moves on
    /// subsequent calls.
    pub fn record(&self, filename: &str, creator_task: &str) -> Result<FileRecord> {
        let now = Utc::now();
        self.store
            .update(|state| ledger::record(state, filename, creator_task, now))
    }

    /// Ledger entry for `filename`; `None` is the typed not-found result.
    pub fn lookup(&self, filename: &str) -> Result<Option<FileRecord>> {
        let state = self.store.load()?;
        Ok(ledger::lookup(&state, filename).cloned())
    }
}
