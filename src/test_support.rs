//! Test-only helpers: a scripted container backend and config fixtures.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::ContainerStatus;
use crate::io::config::SandboxConfig;
use crate::io::docker::{
    Availability, ContainerBackend, ContainerSpec, ExecOutput, InspectedContainer,
    SandboxUnavailable,
};

/// In-memory container runtime for tests. Never spawns a process.
///
/// Maintains a name-to-status map so lifecycle sequences behave like the real
/// runtime (create, stop, start, remove), records every backend call, and can
/// be scripted to fail with [`SandboxUnavailable`] or to delay executions.
/// Clones share state, so tests keep a handle while the manager owns another.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    containers: BTreeMap<String, InspectedContainer>,
    next_id: u64,
    calls: Vec<String>,
    events: Vec<String>,
    fail_next: u32,
    availability: Option<Availability>,
    exec_result: Option<ExecOutput>,
    exec_delay: Duration,
    execs_in_flight: u32,
    overlap_seen: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` backend calls with [`SandboxUnavailable`].
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Script what the capability probe answers.
    pub fn set_probe(&self, availability: Availability) {
        self.lock().availability = Some(availability);
    }

    /// Script the result every `exec` call returns.
    pub fn set_exec_result(&self, result: ExecOutput) {
        self.lock().exec_result = Some(result);
    }

    /// Make each `exec` dwell before returning, to widen race windows.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.lock().exec_delay = delay;
    }

    /// Every backend call made so far, e.g. `"inspect crewbox_dev_env"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(op))
            .count()
    }

    /// Exec start/end markers in observed order.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Whether two `exec` calls ever overlapped in time.
    pub fn saw_overlap(&self) -> bool {
        self.lock().overlap_seen
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(anyhow!(SandboxUnavailable {
                reason: "scripted outage".to_string(),
            }));
        }
        Ok(())
    }
}

impl ContainerBackend for ScriptedBackend {
    fn probe(&self) -> Availability {
        self.lock()
            .availability
            .clone()
            .unwrap_or(Availability::Available)
    }

    fn inspect(&self, name: &str) -> Result<Option<InspectedContainer>> {
        self.record(format!("inspect {name}"))?;
        Ok(self.lock().containers.get(name).cloned())
    }

    fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {}", spec.name))?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("scripted-{}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            InspectedContainer {
                id: id.clone(),
                status: ContainerStatus::Running,
            },
        );
        Ok(id)
    }

    fn start(&self, name: &str) -> Result<()> {
        self.record(format!("start {name}"))?;
        let mut state = self.lock();
        match state.containers.get_mut(name) {
            Some(container) => {
                container.status = ContainerStatus::Running;
                Ok(())
            }
            None => Err(anyhow!("no such container: {name}")),
        }
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.record(format!("stop {name}"))?;
        let mut state = self.lock();
        if let Some(container) = state.containers.get_mut(name) {
            container.status = ContainerStatus::Stopped;
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.record(format!("remove {name}"))?;
        self.lock().containers.remove(name);
        Ok(())
    }

    fn exec(
        &self,
        name: &str,
        command: &str,
        _timeout: Duration,
        _output_limit_bytes: usize,
    ) -> Result<ExecOutput> {
        self.record(format!("exec {name}"))?;
        let delay = {
            let mut state = self.lock();
            if state.execs_in_flight > 0 {
                state.overlap_seen = true;
            }
            state.execs_in_flight += 1;
            state.events.push(format!("exec-start {command}"));
            state.exec_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let mut state = self.lock();
        state.execs_in_flight -= 1;
        state.events.push(format!("exec-end {command}"));
        Ok(state.exec_result.clone().unwrap_or(ExecOutput {
            stdout: format!("ran: {command}\n"),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
        }))
    }
}

/// Sandbox config tuned for tests: near-zero backoff so retry paths run fast.
pub fn test_sandbox_config() -> SandboxConfig {
    SandboxConfig {
        exec_timeout_secs: 5,
        ensure_retries: 2,
        retry_backoff_ms: 1,
        ..SandboxConfig::default()
    }
}
