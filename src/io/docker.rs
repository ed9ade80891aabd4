//! Container backend abstraction and its `docker` CLI implementation.
//!
//! The [`ContainerBackend`] trait decouples sandbox lifecycle management from
//! the actual runtime. Production uses [`DockerCli`], which shells out to the
//! `docker` binary; tests use scripted backends that never spawn containers.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::ContainerStatus;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Wall-clock budget for control-plane calls (inspect, start, stop, rm).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Budget for creating the container, which may pull the image first.
const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Budget for the best-effort in-container kill after an exec timeout.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

const CONTROL_OUTPUT_LIMIT: usize = 64 * 1024;

/// The execution backend cannot be reached at all: CLI missing or the
/// container daemon is down. The one fatal condition of the sandbox layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxUnavailable {
    pub reason: String,
}

impl fmt::Display for SandboxUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox backend unavailable: {}", self.reason)
    }
}

impl std::error::Error for SandboxUnavailable {}

/// Outcome of the capability probe. Never an error: "unavailable" is an
/// expected answer consumed by the orchestrator as a feature flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

/// Parameters for creating the persistent container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted read-write into the container.
    pub mount_source: PathBuf,
    /// Mount target, also used as the working directory.
    pub mount_target: String,
}

/// An inspected container: runtime id plus lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedContainer {
    pub id: String,
    pub status: ContainerStatus,
}

/// Raw result of one in-container command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Everything the sandbox manager needs from a container runtime.
pub trait ContainerBackend {
    fn probe(&self) -> Availability;

    /// Inspect the named container. `None` means it does not exist.
    fn inspect(&self, name: &str) -> Result<Option<InspectedContainer>>;

    /// Create the container detached with a keep-alive command and start it.
    /// Returns the runtime-assigned container id.
    fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    fn start(&self, name: &str) -> Result<()>;

    /// Stop the named container. Already-stopped or missing is a no-op.
    fn stop(&self, name: &str) -> Result<()>;

    /// Remove the named container. Missing is a no-op.
    fn remove(&self, name: &str) -> Result<()>;

    /// Run `command` inside the container via `bash -lc`, with a timeout and
    /// bounded output capture. A timeout or non-zero exit is data, not an
    /// error; errors mean the command could not be issued at all.
    fn exec(
        &self,
        name: &str,
        command: &str,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<ExecOutput>;
}

/// Backend that shells out to the `docker` CLI.
#[derive(Debug, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    /// Run a docker control command, classifying daemon-connectivity
    /// failures as [`SandboxUnavailable`].
    fn control(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("docker");
        cmd.args(args);
        let output = match run_command_with_timeout(cmd, timeout, CONTROL_OUTPUT_LIMIT) {
            Ok(output) => output,
            Err(err) => {
                // A spawn failure means the docker binary itself is missing.
                return Err(anyhow!(SandboxUnavailable {
                    reason: format!("failed to invoke docker: {err:#}"),
                }));
            }
        };
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            if is_daemon_unreachable(&stderr) {
                return Err(anyhow!(SandboxUnavailable {
                    reason: stderr.trim().to_string(),
                }));
            }
        }
        Ok(output)
    }
}

/// Heuristic match on docker CLI stderr for "the daemon is not reachable".
fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("error during connect")
        || stderr.contains("Is the docker daemon running")
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

fn parse_container_status(raw: &str) -> ContainerStatus {
    match raw {
        "running" => ContainerStatus::Running,
        "created" => ContainerStatus::Creating,
        "removing" => ContainerStatus::Removed,
        // exited, paused, dead, restarting: startable or at least not running
        _ => ContainerStatus::Stopped,
    }
}

impl ContainerBackend for DockerCli {
    fn probe(&self) -> Availability {
        match self.control(
            &["version", "--format", "{{.Server.Version}}"],
            CONTROL_TIMEOUT,
        ) {
            Ok(output) if output.status.success() => Availability::Available,
            Ok(output) => Availability::Unavailable {
                reason: output.stderr_lossy().trim().to_string(),
            },
            Err(err) => Availability::Unavailable {
                reason: format!("{err:#}"),
            },
        }
    }

    #[instrument(skip(self))]
    fn inspect(&self, name: &str) -> Result<Option<InspectedContainer>> {
        let output = self.control(
            &[
                "inspect",
                "--format",
                "{{.Id}} {{.State.Status}}",
                name,
            ],
            CONTROL_TIMEOUT,
        )?;
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            if is_missing_container(&stderr) {
                debug!(name, "container not found");
                return Ok(None);
            }
            return Err(anyhow!("docker inspect {name} failed: {}", stderr.trim()));
        }
        let stdout = output.stdout_lossy();
        let mut parts = stdout.split_whitespace();
        let id = parts
            .next()
            .ok_or_else(|| anyhow!("docker inspect returned no id for {name}"))?
            .to_string();
        let status = parse_container_status(parts.next().unwrap_or_default());
        debug!(name, id = %id, ?status, "inspected container");
        Ok(Some(InspectedContainer { id, status }))
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let mount = format!(
            "{}:{}",
            spec.mount_source.display(),
            spec.mount_target
        );
        let output = self.control(
            &[
                "run",
                "-d",
                "--name",
                &spec.name,
                "-v",
                &mount,
                "-w",
                &spec.mount_target,
                &spec.image,
                "tail",
                "-f",
                "/dev/null",
            ],
            CREATE_TIMEOUT,
        )?;
        if !output.status.success() {
            return Err(anyhow!(
                "docker run failed for {}: {}",
                spec.name,
                output.stderr_lossy().trim()
            ));
        }
        let id = output.stdout_lossy().trim().to_string();
        if id.is_empty() {
            return Err(anyhow!("docker run returned no container id"));
        }
        Ok(id)
    }

    #[instrument(skip(self))]
    fn start(&self, name: &str) -> Result<()> {
        let output = self.control(&["start", name], CONTROL_TIMEOUT)?;
        if !output.status.success() {
            return Err(anyhow!(
                "docker start {name} failed: {}",
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn stop(&self, name: &str) -> Result<()> {
        let output = self.control(&["stop", name], CONTROL_TIMEOUT)?;
        if !output.status.success() && !is_missing_container(&output.stderr_lossy()) {
            return Err(anyhow!(
                "docker stop {name} failed: {}",
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, name: &str) -> Result<()> {
        let output = self.control(&["rm", "-f", name], CONTROL_TIMEOUT)?;
        if !output.status.success() && !is_missing_container(&output.stderr_lossy()) {
            return Err(anyhow!(
                "docker rm {name} failed: {}",
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, command), fields(timeout_secs = timeout.as_secs()))]
    fn exec(
        &self,
        name: &str,
        command: &str,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<ExecOutput> {
        let mut cmd = Command::new("docker");
        // bash -lc keeps pipes, chains, and login-shell PATH working.
        cmd.args(["exec", name, "bash", "-lc", command]);
        let output = match run_command_with_timeout(cmd, timeout, output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                return Err(anyhow!(SandboxUnavailable {
                    reason: format!("failed to invoke docker exec: {err:#}"),
                }));
            }
        };

        let stderr = output.stderr_lossy();
        if !output.status.success() && is_daemon_unreachable(&stderr) {
            return Err(anyhow!(SandboxUnavailable {
                reason: stderr.trim().to_string(),
            }));
        }

        if output.timed_out {
            // Killing the docker client leaves the process alive inside the
            // container; issue a best-effort pkill before reporting back.
            warn!(name, "exec timed out, attempting in-container kill");
            let mut kill = Command::new("docker");
            kill.args(["exec", name, "pkill", "-f", command]);
            if let Err(err) = run_command_with_timeout(kill, KILL_TIMEOUT, CONTROL_OUTPUT_LIMIT) {
                warn!(err = %err, "in-container kill failed");
            }
        }

        Ok(ExecOutput {
            stdout: output.stdout_lossy(),
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
            timed_out: output.timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_daemon_unreachable_stderr() {
        assert!(is_daemon_unreachable(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
        ));
        assert!(is_daemon_unreachable(
            "error during connect: this error may indicate that the docker daemon is not running"
        ));
        assert!(!is_daemon_unreachable("No such container: crewbox_dev_env"));
    }

    #[test]
    fn maps_runtime_statuses() {
        assert_eq!(parse_container_status("running"), ContainerStatus::Running);
        assert_eq!(parse_container_status("created"), ContainerStatus::Creating);
        assert_eq!(parse_container_status("exited"), ContainerStatus::Stopped);
        assert_eq!(parse_container_status("removing"), ContainerStatus::Removed);
    }

    #[test]
    fn sandbox_unavailable_is_downcastable() {
        let err = anyhow!(SandboxUnavailable {
            reason: "daemon down".to_string(),
        });
        let unavailable = err
            .downcast_ref::<SandboxUnavailable>()
            .expect("downcast SandboxUnavailable");
        assert_eq!(unavailable.reason, "daemon down");
    }
}
