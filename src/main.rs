//! Sandboxed execution and workflow coordination for agent crews.
//!
//! Manages one persistent Docker container plus a durable coordination
//! document (`.workflow_state.json`) in the shared workspace. All replies go
//! to stdout as JSON; diagnostics go to stderr via `RUST_LOG`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use crewbox::core::types::TodoStatus;
use crewbox::dispatch::{WorkflowCommand, WorkflowRouter};
use crewbox::io::config::{CONFIG_PATH, CrewConfig, load_config, write_config};
use crewbox::io::docker::Availability;
use crewbox::io::sandbox::SandboxManager;
use crewbox::io::state_store::StateStore;

#[derive(Parser)]
#[command(
    name = "crewbox",
    version,
    about = "Sandboxed execution and workflow coordination for agent crews"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default `.crewbox/config.toml` if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Reset the coordination state to the empty skeleton and remove the
    /// sandbox container, so nothing bleeds across runs.
    Reset {
        /// Keep the container; only the state document is reset.
        #[arg(long)]
        keep_sandbox: bool,
    },
    /// Run a shell command inside the sandbox container.
    Exec {
        command: String,
        /// Per-command timeout in seconds (defaults to the configured value).
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Shared todo list operations.
    Todo {
        #[command(subcommand)]
        action: TodoAction,
    },
    /// Record that a task produced a file in the workspace.
    Record { filename: String, task: String },
    /// Check whether a workspace file exists and who created it.
    CheckFile { filename: String },
    /// Check whether a task's upstream outputs are all present.
    CheckReady { task: String },
    /// Summarize sandbox and coordination state.
    Status,
}

#[derive(Subcommand)]
enum TodoAction {
    /// Append a new pending item.
    Add { description: String },
    /// Mark an item in-progress.
    Start { id: u64 },
    /// Mark an item done.
    Complete { id: u64 },
    /// Show open and completed items.
    List {
        /// Filter by status: pending, in_progress, or done.
        #[arg(long, value_parser = parse_status)]
        status: Option<TodoStatus>,
    },
}

fn parse_status(raw: &str) -> Result<TodoStatus, String> {
    match raw {
        "pending" => Ok(TodoStatus::Pending),
        "in_progress" => Ok(TodoStatus::InProgress),
        "done" => Ok(TodoStatus::Done),
        other => Err(format!(
            "unknown status '{other}' (expected pending, in_progress, or done)"
        )),
    }
}

fn main() {
    crewbox::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = Path::new(".");
    // Init runs before the config is parsed: --force exists precisely to
    // replace a config that no longer loads.
    let command = match cli.command {
        Command::Init { force } => return cmd_init(root, force),
        command => command,
    };
    let config = load_config(&root.join(CONFIG_PATH))?;
    match command {
        Command::Init { .. } => unreachable!("handled before config load"),
        Command::Reset { keep_sandbox } => cmd_reset(root, &config, keep_sandbox),
        Command::Exec {
            command,
            timeout_secs,
        } => cmd_exec(root, &config, &command, timeout_secs),
        Command::Todo { action } => dispatch(root, &config, todo_command(action)),
        Command::Record { filename, task } => {
            dispatch(root, &config, WorkflowCommand::RecordFile { filename, task })
        }
        Command::CheckFile { filename } => {
            dispatch(root, &config, WorkflowCommand::CheckFile { filename })
        }
        Command::CheckReady { task } => {
            dispatch(root, &config, WorkflowCommand::CheckReady { task })
        }
        Command::Status => cmd_status(root, &config),
    }
}

fn todo_command(action: TodoAction) -> WorkflowCommand {
    match action {
        TodoAction::Add { description } => WorkflowCommand::TodoAdd { description },
        TodoAction::Start { id } => WorkflowCommand::TodoStart { id },
        TodoAction::Complete { id } => WorkflowCommand::TodoComplete { id },
        TodoAction::List { status } => WorkflowCommand::TodoList { status },
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let path = root.join(CONFIG_PATH);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &CrewConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    print_json(&json!({ "result": "initialized", "config": path }))
}

fn cmd_reset(root: &Path, config: &CrewConfig, keep_sandbox: bool) -> Result<()> {
    let store = StateStore::new(config.state_path(root));
    store.reset()?;
    if !keep_sandbox {
        let manager =
            SandboxManager::docker(config.sandbox.clone(), config.workspace_dir(root));
        manager.remove().context("remove sandbox container")?;
    }
    print_json(&json!({
        "result": "reset",
        "state": store.path(),
        "sandbox_removed": !keep_sandbox,
    }))
}

fn cmd_exec(
    root: &Path,
    config: &CrewConfig,
    command: &str,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let manager = SandboxManager::docker(config.sandbox.clone(), config.workspace_dir(root));
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| manager.default_timeout());
    let result = manager.exec(command, timeout)?;
    print_json(&result)
}

fn cmd_status(root: &Path, config: &CrewConfig) -> Result<()> {
    let manager = SandboxManager::docker(config.sandbox.clone(), config.workspace_dir(root));
    // Unavailable is an answer here, not an error: status must still render
    // the coordination state when the daemon is down.
    let (backend, container) = match manager.probe() {
        Availability::Available => (json!({ "available": true }), manager.inspect()?),
        Availability::Unavailable { reason } => {
            (json!({ "available": false, "reason": reason }), None)
        }
    };
    let store = StateStore::new(config.state_path(root));
    let state = store.load()?;
    print_json(&json!({
        "result": "status",
        "backend": backend,
        "container": container,
        "todo_open": state.todo.len(),
        "done": state.done,
        "files": state.files,
    }))
}

fn dispatch(root: &Path, config: &CrewConfig, command: WorkflowCommand) -> Result<()> {
    let store = StateStore::new(config.state_path(root));
    let router = WorkflowRouter::new(&store, config.workspace_dir(root), &config.tasks);
    let reply = router.dispatch(command)?;
    print_json(&reply)
}

/// Pretty-printed JSON with trailing newline, on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize reply")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["crewbox", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_exec_with_timeout() {
        let cli = Cli::parse_from(["crewbox", "exec", "pytest", "--timeout-secs", "30"]);
        match cli.command {
            Command::Exec {
                command,
                timeout_secs,
            } => {
                assert_eq!(command, "pytest");
                assert_eq!(timeout_secs, Some(30));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn parse_todo_list_with_status() {
        let cli = Cli::parse_from(["crewbox", "todo", "list", "--status", "in_progress"]);
        match cli.command {
            Command::Todo {
                action: TodoAction::List { status },
            } => assert_eq!(status, Some(TodoStatus::InProgress)),
            _ => panic!("expected todo list"),
        }
    }

    #[test]
    fn parse_check_ready() {
        let cli = Cli::parse_from(["crewbox", "check-ready", "design_task"]);
        match cli.command {
            Command::CheckReady { task } => assert_eq!(task, "design_task"),
            _ => panic!("expected check-ready"),
        }
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(parse_status("finished").is_err());
    }

    #[test]
    fn init_force_replaces_a_corrupt_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_PATH);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "this is { not toml").expect("write corrupt");

        cmd_init(temp.path(), true).expect("init --force over corrupt config");
        let loaded = load_config(&path).expect("config parses after init");
        assert_eq!(loaded, CrewConfig::default());
    }

    #[test]
    fn init_without_force_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        cmd_init(temp.path(), false).expect("first init");
        let err = cmd_init(temp.path(), false).expect_err("second init");
        assert!(err.to_string().contains("--force"));
    }
}
