//! Dependency checkpoint gate.
//!
//! Answers "is it safe to read artifact X / start task Y" without trusting
//! the ledger alone: agents can produce files straight through the sandbox,
//! so presence on the real backing storage is authoritative and the ledger
//! only contributes attribution. All checks are read-only and safe to poll.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::ledger;
use crate::core::types::{FileCheck, ReadyCheck};
use crate::io::config::TaskGraph;
use crate::io::state_store::StateStore;

/// Read-only gate combining ledger lookups with filesystem checks.
pub struct CheckpointValidator<'a> {
    store: &'a StateStore,
    workspace: PathBuf,
    tasks: &'a TaskGraph,
}

impl<'a> CheckpointValidator<'a> {
    pub fn new(store: &'a StateStore, workspace: PathBuf, tasks: &'a TaskGraph) -> Self {
        Self {
            store,
            workspace,
            tasks,
        }
    }

    /// Check one artifact. Existence and size come from the filesystem;
    /// creator from the ledger when a record exists.
    pub fn check_file(&self, filename: &str) -> Result<FileCheck> {
        let path = self.resolve(filename)?;
        let size_bytes = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            Ok(_) => None,
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", path.display()));
            }
        };
        let exists = size_bytes.is_some();

        let state = self.store.load()?;
        let creator = ledger::lookup(&state, filename).map(|rec| rec.creator.clone());

        debug!(filename, exists, ?creator, "checked artifact");
        Ok(FileCheck {
            filename: filename.to_string(),
            exists,
            size_bytes,
            creator,
        })
    }

    /// Check whether every predecessor output `task` depends on exists on
    /// the backing storage. Recording a file in the ledger without the file
    /// actually existing never makes a task ready.
    pub fn check_ready(&self, task: &str) -> Result<ReadyCheck> {
        let Some(spec) = self.tasks.get(task) else {
            return Ok(ReadyCheck {
                task: task.to_string(),
                ready: false,
                missing: Vec::new(),
                satisfied: Vec::new(),
                reason: format!("unknown task '{task}': not in the dependency map"),
            });
        };

        if spec.requires.is_empty() {
            return Ok(ReadyCheck {
                task: task.to_string(),
                ready: true,
                missing: Vec::new(),
                satisfied: Vec::new(),
                reason: format!("{task} has no dependencies"),
            });
        }

        let mut missing = Vec::new();
        let mut satisfied = Vec::new();
        for dep in &spec.requires {
            let Some(dep_spec) = self.tasks.get(dep) else {
                missing.push(format!("{dep}:?"));
                continue;
            };
            let check = self.check_file(&dep_spec.output)?;
            let ident = format!("{dep}:{}", dep_spec.output);
            if check.exists {
                satisfied.push(ident);
            } else {
                missing.push(ident);
            }
        }

        let ready = missing.is_empty();
        let reason = if ready {
            format!("all dependencies of {task} are satisfied")
        } else {
            format!("{task} is blocked, waiting for: {}", missing.join(", "))
        };
        Ok(ReadyCheck {
            task: task.to_string(),
            ready,
            missing,
            satisfied,
            reason,
        })
    }

    /// Human-readable rendering of a file check, including which task is
    /// expected to produce a missing artifact.
    pub fn describe(&self, check: &FileCheck) -> String {
        if check.exists {
            let creator = check.creator.as_deref().unwrap_or("unknown");
            let size = check.size_bytes.unwrap_or(0);
            return format!(
                "{} exists ({size} bytes, created by: {creator})",
                check.filename
            );
        }
        match self.tasks.producer_of(&check.filename) {
            Some(producer) => format!(
                "{} not found (expected output of {producer}; wait for it to complete)",
                check.filename
            ),
            None => format!(
                "{} not found (no task claims this output)",
                check.filename
            ),
        }
    }

    /// Confine `filename` to the workspace: relative, no parent traversal.
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let candidate = Path::new(filename);
        if candidate.is_absolute() {
            return Err(anyhow!("filename must be relative to the workspace: {filename}"));
        }
        if candidate
            .components()
            .any(|part| matches!(part, Component::ParentDir))
        {
            return Err(anyhow!("filename must not traverse outside the workspace: {filename}"));
        }
        Ok(self.workspace.join(candidate))
    }
}
