//! Typed command surface for the coordination operations.
//!
//! Agents drive coordination through JSON commands; every command maps to
//! exactly one operation and every reply is a typed, serializable outcome.
//! Invalid requests (unknown todo id, unknown task) come back as data in the
//! reply, errors are reserved for storage and filesystem failures.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::CheckpointValidator;
use crate::core::todo::{TodoListing, TodoTransition};
use crate::core::types::{FileCheck, FileRecord, ReadyCheck, TodoItem, TodoStatus};
use crate::io::config::TaskGraph;
use crate::io::state_store::StateStore;
use crate::ledger::ArtifactLedger;
use crate::todo::TodoStore;

/// One coordination request, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkflowCommand {
    TodoAdd {
        description: String,
    },
    TodoStart {
        id: u64,
    },
    TodoComplete {
        id: u64,
    },
    TodoList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<TodoStatus>,
    },
    RecordFile {
        filename: String,
        task: String,
    },
    LookupFile {
        filename: String,
    },
    CheckFile {
        filename: String,
    },
    CheckReady {
        task: String,
    },
}

/// Typed reply for each command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WorkflowReply {
    Added {
        item: TodoItem,
    },
    Transition {
        #[serde(flatten)]
        transition: TodoTransition,
    },
    Listing {
        #[serde(flatten)]
        listing: TodoListing,
    },
    Recorded {
        filename: String,
        #[serde(flatten)]
        record: FileRecord,
    },
    Lookup {
        filename: String,
        record: Option<FileRecord>,
    },
    FileChecked {
        #[serde(flatten)]
        check: FileCheck,
        detail: String,
    },
    Readiness {
        #[serde(flatten)]
        check: ReadyCheck,
    },
}

/// Routes commands to the coordination services sharing one state store.
pub struct WorkflowRouter<'a> {
    todos: TodoStore<'a>,
    artifacts: ArtifactLedger<'a>,
    checkpoints: CheckpointValidator<'a>,
}

impl<'a> WorkflowRouter<'a> {
    pub fn new(store: &'a StateStore, workspace: PathBuf, tasks: &'a TaskGraph) -> Self {
        Self {
            todos: TodoStore::new(store),
            artifacts: ArtifactLedger::new(store),
            checkpoints: CheckpointValidator::new(store, workspace, tasks),
        }
    }

    pub fn dispatch(&self, command: WorkflowCommand) -> Result<WorkflowReply> {
        info!(?command, "dispatching workflow command");
        match command {
            WorkflowCommand::TodoAdd { description } => {
                let item = self.todos.add(&description)?;
                Ok(WorkflowReply::Added { item })
            }
            WorkflowCommand::TodoStart { id } => {
                let transition = self.todos.start(id)?;
                Ok(WorkflowReply::Transition { transition })
            }
            WorkflowCommand::TodoComplete { id } => {
                let transition = self.todos.complete(id)?;
                Ok(WorkflowReply::Transition { transition })
            }
            WorkflowCommand::TodoList { status } => {
                let listing = self.todos.list(status)?;
                Ok(WorkflowReply::Listing { listing })
            }
            WorkflowCommand::RecordFile { filename, task } => {
                let record = self.artifacts.record(&filename, &task)?;
                Ok(WorkflowReply::Recorded { filename, record })
            }
            WorkflowCommand::LookupFile { filename } => {
                let record = self.artifacts.lookup(&filename)?;
                Ok(WorkflowReply::Lookup { filename, record })
            }
            WorkflowCommand::CheckFile { filename } => {
                let check = self.checkpoints.check_file(&filename)?;
                let detail = self.checkpoints.describe(&check);
                Ok(WorkflowReply::FileChecked { check, detail })
            }
            WorkflowCommand::CheckReady { task } => {
                let check = self.checkpoints.check_ready(&task)?;
                Ok(WorkflowReply::Readiness { check })
            }
        }
    }
}
