//! Crewbox configuration stored under `.crewbox/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Location of the config file relative to the run root.
pub const CONFIG_PATH: &str = ".crewbox/config.toml";

/// Name of the coordination state document inside the workspace directory.
pub const STATE_FILE_NAME: &str = ".workflow_state.json";

/// Crewbox configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to the stock crew pipeline values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrewConfig {
    pub sandbox: SandboxConfig,

    /// Dependency map from logical task name to its prerequisites and expected
    /// output file. Read-only to the core; the orchestrator owns its content.
    pub tasks: TaskGraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Name of the one persistent container for this run.
    pub container_name: String,

    /// Image to create the container from.
    pub image: String,

    /// Host directory (relative to the run root) bind-mounted into the
    /// container. Artifacts and the state document live here.
    pub workspace_dir: String,

    /// Mount target and working directory inside the container.
    pub container_workdir: String,

    /// Default per-command timeout in seconds.
    pub exec_timeout_secs: u64,

    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// How many times to retry a backend call that failed with an
    /// unavailable daemon before giving up.
    pub ensure_retries: u32,

    /// Linear backoff between retries, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container_name: "crewbox_dev_env".to_string(),
            image: "nikolaik/python-nodejs:latest".to_string(),
            workspace_dir: "output".to_string(),
            container_workdir: "/app".to_string(),
            exec_timeout_secs: 300,
            output_limit_bytes: 1_000_000,
            ensure_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// One task's place in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TaskSpec {
    /// Tasks whose outputs must exist before this task may start.
    pub requires: Vec<String>,
    /// Filename this task is expected to produce in the workspace.
    pub output: String,
}

/// Mapping from logical task name to [`TaskSpec`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TaskGraph(pub BTreeMap<String, TaskSpec>);

impl TaskGraph {
    pub fn get(&self, task: &str) -> Option<&TaskSpec> {
        self.0.get(task)
    }

    /// Task expected to produce `filename`, if any task claims it.
    pub fn producer_of(&self, filename: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, spec)| spec.output == filename)
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TaskGraph {
    /// The stock eight-task pipeline: product definition through test report.
    fn default() -> Self {
        let specs = [
            ("pm_task", &[][..], "requirements.md"),
            ("cto_task", &["pm_task"][..], "tech_stack.md"),
            ("devops_task", &["cto_task"][..], "lockfile.txt"),
            ("design_task", &["pm_task", "devops_task"][..], "architecture.md"),
            ("backend_task", &["design_task"][..], "backend_app.py"),
            (
                "frontend_task",
                &["design_task", "backend_task"][..],
                "frontend_app.py",
            ),
            (
                "review_task",
                &["backend_task", "frontend_task"][..],
                "review_report.md",
            ),
            (
                "test_task",
                &["backend_task", "frontend_task"][..],
                "test_report.md",
            ),
        ];
        let map = specs
            .into_iter()
            .map(|(name, requires, output)| {
                (
                    name.to_string(),
                    TaskSpec {
                        requires: requires.iter().map(|dep| dep.to_string()).collect(),
                        output: output.to_string(),
                    },
                )
            })
            .collect();
        Self(map)
    }
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            tasks: TaskGraph::default(),
        }
    }
}

impl CrewConfig {
    pub fn validate(&self) -> Result<()> {
        validate_container_name(&self.sandbox.container_name)?;
        if self.sandbox.image.trim().is_empty() {
            return Err(anyhow!("sandbox.image must not be empty"));
        }
        if self.sandbox.workspace_dir.trim().is_empty() {
            return Err(anyhow!("sandbox.workspace_dir must not be empty"));
        }
        if !self.sandbox.container_workdir.starts_with('/') {
            return Err(anyhow!("sandbox.container_workdir must be an absolute path"));
        }
        if self.sandbox.exec_timeout_secs == 0 {
            return Err(anyhow!("sandbox.exec_timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (name, spec) in &self.tasks.0 {
            for dep in &spec.requires {
                if !self.tasks.0.contains_key(dep) {
                    return Err(anyhow!(
                        "task '{name}' requires unknown task '{dep}'"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Host workspace directory resolved against the run root.
    pub fn workspace_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.sandbox.workspace_dir)
    }

    /// Path of the coordination state document.
    pub fn state_path(&self, root: &Path) -> PathBuf {
        self.workspace_dir(root).join(STATE_FILE_NAME)
    }
}

/// Validate a container name against the runtime's accepted charset.
fn validate_container_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    if !valid_first {
        return Err(anyhow!(
            "sandbox.container_name must start with an alphanumeric character"
        ));
    }
    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')) {
        return Err(anyhow!(
            "sandbox.container_name must be [A-Za-z0-9._-] only (got '{name}')"
        ));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CrewConfig::default()`.
pub fn load_config(path: &Path) -> Result<CrewConfig> {
    if !path.exists() {
        let cfg = CrewConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CrewConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CrewConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
