//! Shared deterministic types for workflow coordination.
//!
//! These types define stable contracts between components. They should not
//! depend on external state or I/O and must serialize identically across runs
//! (the workflow state document is diffed and audited by humans).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a coordination work item.
///
/// Transitions are monotonic forward only: `pending → in_progress → done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

/// A unit of visible coordination work shared across agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique, monotonically assigned id. Never reused within a run.
    pub id: u64,
    pub description: String,
    pub status: TodoStatus,
}

/// Producer attribution for one artifact in the shared workspace.
///
/// `creator` and `created_at` are first-writer-wins; later `record` calls for
/// the same filename only bump `last_modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// The single durable coordination document (`.workflow_state.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    /// Open work items, in insertion order.
    pub todo: Vec<TodoItem>,
    /// Completed work items, in completion order (audit trail).
    pub done: Vec<TodoItem>,
    /// Artifact ledger keyed by filename relative to the workspace.
    pub files: BTreeMap<String, FileRecord>,
}

impl WorkflowState {
    /// Next unique todo id: one past the highest id ever assigned.
    ///
    /// Completion moves items from `todo` to `done` without deleting them, so
    /// scanning both lists is sufficient to never reuse an id.
    pub fn next_todo_id(&self) -> u64 {
        self.todo
            .iter()
            .chain(self.done.iter())
            .map(|item| item.id)
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Observed lifecycle state of the sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    NotFound,
    Creating,
    Running,
    Stopped,
    Removed,
}

/// Handle for the one persistent sandbox container.
///
/// `id` is the runtime-assigned container id and stays stable across repeated
/// `ensure` calls until the container is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
}

/// Exit code reported when a sandbox command exceeds its timeout, matching
/// the `timeout(1)` convention.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Captured outcome of one sandbox command execution.
///
/// A non-zero exit code is ordinary data for the caller to interpret, never
/// an error of the sandbox layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub finished_at: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Result of checking one artifact against the real backing storage.
///
/// `exists` and `size_bytes` come from the filesystem (authoritative);
/// `creator` comes from the ledger and is absent when the file was produced
/// without going through `record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCheck {
    pub filename: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
}

/// Result of checking whether a task's upstream outputs are all present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyCheck {
    pub task: String,
    pub ready: bool,
    /// `task:filename` identifiers for each required output still absent.
    pub missing: Vec<String>,
    /// `task:filename` identifiers for each required output confirmed on disk.
    pub satisfied: Vec<String>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_todo_id_starts_at_one() {
        let state = WorkflowState::default();
        assert_eq!(state.next_todo_id(), 1);
    }

    #[test]
    fn next_todo_id_counts_done_items() {
        let mut state = WorkflowState::default();
        state.done.push(TodoItem {
            id: 3,
            description: "earlier work".to_string(),
            status: TodoStatus::Done,
        });
        state.todo.push(TodoItem {
            id: 1,
            description: "open work".to_string(),
            status: TodoStatus::Pending,
        });
        assert_eq!(state.next_todo_id(), 4);
    }

    #[test]
    fn todo_status_serializes_snake_case() {
        let json = serde_json::to_string(&TodoStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
    }
}
