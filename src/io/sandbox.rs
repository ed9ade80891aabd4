//! Lifecycle management for the one persistent sandbox container.
//!
//! [`SandboxManager`] guarantees exactly one logical sandbox exists per run
//! and that commands execute inside it one at a time. All operations go
//! through a single internal lock, so concurrent callers never interleave
//! command output or race container creation.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommandResult, Container, ContainerStatus, TIMEOUT_EXIT_CODE};
use crate::io::config::SandboxConfig;
use crate::io::docker::{
    Availability, ContainerBackend, ContainerSpec, DockerCli, SandboxUnavailable,
};

/// Owns the persistent execution environment and serializes access to it.
pub struct SandboxManager<B: ContainerBackend> {
    backend: B,
    config: SandboxConfig,
    /// Absolute host directory bind-mounted into the container.
    workspace: PathBuf,
    /// Serializes ensure/exec/stop/remove. Commands never run concurrently.
    ops: Mutex<()>,
}

impl SandboxManager<DockerCli> {
    /// Manager over the real `docker` CLI backend.
    pub fn docker(config: SandboxConfig, workspace: PathBuf) -> Self {
        Self::new(DockerCli::new(), config, workspace)
    }
}

impl<B: ContainerBackend> SandboxManager<B> {
    pub fn new(backend: B, config: SandboxConfig, workspace: PathBuf) -> Self {
        Self {
            backend,
            config,
            workspace,
            ops: Mutex::new(()),
        }
    }

    /// Default per-command timeout from the configuration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.config.exec_timeout_secs)
    }

    /// Capability probe: is the backend reachable at all?
    pub fn probe(&self) -> Availability {
        self.backend.probe()
    }

    /// Ensure the sandbox container exists and is running. Idempotent:
    /// repeated calls return the same container identity.
    #[instrument(skip(self))]
    pub fn ensure(&self) -> Result<Container> {
        let _guard = self.lock();
        self.ensure_locked()
    }

    /// Run `command` inside the sandbox, serialized against all other calls.
    ///
    /// Never errors for a timeout or a non-zero exit: those come back as
    /// [`CommandResult`] data. Errors mean the backend could not be reached.
    #[instrument(skip(self, command), fields(timeout_secs = timeout.as_secs()))]
    pub fn exec(&self, command: &str, timeout: Duration) -> Result<CommandResult> {
        let _guard = self.lock();
        let container = self.ensure_locked()?;

        debug!(container = %container.name, "executing sandbox command");
        let output = self.with_retries("exec", || {
            self.backend.exec(
                &container.name,
                command,
                timeout,
                self.config.output_limit_bytes,
            )
        })?;

        let exit_code = if output.timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            output.exit_code
        };
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "sandbox command timed out");
        }
        Ok(CommandResult {
            command: command.to_string(),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
            timed_out: output.timed_out,
            finished_at: Utc::now(),
        })
    }

    /// Observed container state without creating or starting anything.
    /// `None` means the container does not exist.
    pub fn inspect(&self) -> Result<Option<Container>> {
        let _guard = self.lock();
        let name = &self.config.container_name;
        let inspected = self.with_retries("inspect", || self.backend.inspect(name))?;
        Ok(inspected.map(|found| Container {
            id: found.id,
            name: name.clone(),
            status: found.status,
        }))
    }

    /// Stop the container if it is running. No-op when already stopped or
    /// never created.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let _guard = self.lock();
        self.with_retries("stop", || self.backend.stop(&self.config.container_name))
    }

    /// Remove the container entirely. A later `ensure` recreates it fresh.
    #[instrument(skip(self))]
    pub fn remove(&self) -> Result<()> {
        let _guard = self.lock();
        self.with_retries("remove", || self.backend.remove(&self.config.container_name))
    }

    fn ensure_locked(&self) -> Result<Container> {
        let name = &self.config.container_name;
        let inspected = self.with_retries("inspect", || self.backend.inspect(name))?;
        match inspected {
            Some(found) if found.status == ContainerStatus::Running => Ok(Container {
                id: found.id,
                name: name.clone(),
                status: ContainerStatus::Running,
            }),
            Some(found)
                if matches!(
                    found.status,
                    ContainerStatus::Stopped | ContainerStatus::Creating
                ) =>
            {
                info!(name, "starting stopped sandbox container");
                self.with_retries("start", || self.backend.start(name))?;
                Ok(Container {
                    id: found.id,
                    name: name.clone(),
                    status: ContainerStatus::Running,
                })
            }
            // NotFound, or a corpse in `removing` state: create from scratch.
            _ => {
                // The mount source must exist before the runtime binds it.
                // Deferred to here so a failed ensure leaves no trace.
                fs::create_dir_all(&self.workspace)
                    .with_context(|| format!("create workspace {}", self.workspace.display()))?;
                info!(name, image = %self.config.image, "creating sandbox container");
                let spec = ContainerSpec {
                    name: name.clone(),
                    image: self.config.image.clone(),
                    mount_source: self.workspace.clone(),
                    mount_target: self.config.container_workdir.clone(),
                };
                let id = self.with_retries("create", || self.backend.create_and_start(&spec))?;
                Ok(Container {
                    id,
                    name: name.clone(),
                    status: ContainerStatus::Running,
                })
            }
        }
    }

    /// Retry `f` on backend-unavailable errors with linear backoff, then give
    /// up and surface [`SandboxUnavailable`] to the caller. Other errors are
    /// returned immediately.
    fn with_retries<T>(&self, op: &str, f: impl Fn() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is::<SandboxUnavailable>() => {
                    if attempt >= self.config.ensure_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    let backoff =
                        Duration::from_millis(self.config.retry_backoff_ms * u64::from(attempt));
                    warn!(
                        op,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "sandbox backend unavailable, retrying"
                    );
                    thread::sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another exec panicked; the guard data is ().
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
