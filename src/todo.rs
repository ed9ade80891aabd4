//! Persistent todo tracking shared across agents.
//!
//! Thin orchestration over [`core::todo`](crate::core::todo): every mutation
//! is one scoped read-modify-write on the [`StateStore`], so the on-disk
//! document is current after each call.

use anyhow::Result;

use crate::core::todo::{self, TodoListing, TodoTransition};
use crate::core::types::{TodoItem, TodoStatus};
use crate::io::state_store::StateStore;

/// Ordered work-item tracking backed by the shared state document.
pub struct TodoStore<'a> {
    store: &'a StateStore,
}

impl<'a> TodoStore<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Append a new pending item and return it (with its unique id).
    pub fn add(&self, description: &str) -> Result<TodoItem> {
        self.store.update(|state| todo::add(state, description))
    }

    /// Move `id` from pending to in-progress.
    pub fn start(&self, id: u64) -> Result<TodoTransition> {
        self.store.update(|state| todo::start(state, id))
    }

    /// Move `id` to done; repeat completions are reported, not duplicated.
    pub fn complete(&self, id: u64) -> Result<TodoTransition> {
        self.store.update(|state| todo::complete(state, id))
    }

    /// Read-only snapshot; never mutates the document.
    pub fn list(&self, filter: Option<TodoStatus>) -> Result<TodoListing> {
        let state = self.store.load()?;
        Ok(todo::list(&state, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TodoStatus;

    fn store_in(temp: &tempfile::TempDir) -> StateStore {
        StateStore::new(temp.path().join(".workflow_state.json"))
    }

    #[test]
    fn add_start_complete_persist_across_instances() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let item = TodoStore::new(&store).add("write design doc").expect("add");
        assert_eq!(item.id, 1);

        // A fresh handle sees the persisted item.
        let todos = TodoStore::new(&store);
        let started = todos.start(1).expect("start");
        assert!(matches!(
            started,
            TodoTransition::Started { ref item } if item.status == TodoStatus::InProgress
        ));

        let completed = todos.complete(1).expect("complete");
        assert!(matches!(completed, TodoTransition::Completed { .. }));

        let listing = todos.list(None).expect("list");
        assert!(listing.todo.is_empty());
        assert_eq!(listing.done.len(), 1);
    }

    #[test]
    fn unknown_id_is_data_not_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let outcome = TodoStore::new(&store).start(99).expect("start");
        assert_eq!(outcome, TodoTransition::UnknownId { id: 99 });
    }
}
