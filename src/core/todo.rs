//! Pure todo transition logic over [`WorkflowState`].
//!
//! Status moves are monotonic forward only (`pending → in_progress → done`);
//! anything else is reported as typed data, never as a process-level error.
//! Persistence is layered on top by [`crate::todo::TodoStore`].

use serde::{Deserialize, Serialize};

use crate::core::types::{TodoItem, TodoStatus, WorkflowState};

/// Typed outcome of a todo status transition.
///
/// Invalid requests (unknown id, backwards move, repeat completion) are
/// ordinary variants so the caller decides how to react.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TodoTransition {
    Started { item: TodoItem },
    Completed { item: TodoItem },
    AlreadyDone { id: u64 },
    UnknownId { id: u64 },
    InvalidTransition { id: u64, status: TodoStatus },
}

/// Read-only snapshot of both lists, optionally filtered by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoListing {
    pub todo: Vec<TodoItem>,
    pub done: Vec<TodoItem>,
}

/// Append a new pending item with the next unique id.
pub fn add(state: &mut WorkflowState, description: &str) -> TodoItem {
    let item = TodoItem {
        id: state.next_todo_id(),
        description: description.to_string(),
        status: TodoStatus::Pending,
    };
    state.todo.push(item.clone());
    item
}

/// Move a pending item to `in_progress`.
pub fn start(state: &mut WorkflowState, id: u64) -> TodoTransition {
    if let Some(item) = state.todo.iter_mut().find(|item| item.id == id) {
        return match item.status {
            TodoStatus::Pending => {
                item.status = TodoStatus::InProgress;
                TodoTransition::Started { item: item.clone() }
            }
            // Only pending → in_progress is a legal start.
            status => TodoTransition::InvalidTransition { id, status },
        };
    }
    if state.done.iter().any(|item| item.id == id) {
        return TodoTransition::InvalidTransition {
            id,
            status: TodoStatus::Done,
        };
    }
    TodoTransition::UnknownId { id }
}

/// Move a pending or in-progress item to `done`, appending it to the `done`
/// list in completion order.
///
/// Completing an already-done id is a no-op reported as `AlreadyDone`.
pub fn complete(state: &mut WorkflowState, id: u64) -> TodoTransition {
    if let Some(pos) = state.todo.iter().position(|item| item.id == id) {
        let mut item = state.todo.remove(pos);
        item.status = TodoStatus::Done;
        state.done.push(item.clone());
        return TodoTransition::Completed { item };
    }
    if state.done.iter().any(|item| item.id == id) {
        return TodoTransition::AlreadyDone { id };
    }
    TodoTransition::UnknownId { id }
}

/// Snapshot both lists without mutating state.
pub fn list(state: &WorkflowState, filter: Option<TodoStatus>) -> TodoListing {
    let keep = |item: &&TodoItem| filter.is_none_or(|status| item.status == status);
    TodoListing {
        todo: state.todo.iter().filter(keep).cloned().collect(),
        done: state.done.iter().filter(keep).cloned().collect(),
    }
}
