//! Sandbox lifecycle behavior over a scripted backend: idempotent ensure,
//! serialized execution, retry-then-fail on an unreachable backend.

use std::thread;
use std::time::{Duration, Instant};

use crewbox::core::types::TIMEOUT_EXIT_CODE;
use crewbox::io::docker::{Availability, ExecOutput, SandboxUnavailable};
use crewbox::io::sandbox::SandboxManager;
use crewbox::test_support::{ScriptedBackend, test_sandbox_config};

fn manager_in(
    temp: &tempfile::TempDir,
    backend: ScriptedBackend,
) -> SandboxManager<ScriptedBackend> {
    SandboxManager::new(
        backend,
        test_sandbox_config(),
        temp.path().join("output"),
    )
}

#[test]
fn ensure_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    let manager = manager_in(&temp, backend.clone());

    let first = manager.ensure().expect("first ensure");
    let second = manager.ensure().expect("second ensure");

    assert_eq!(first.id, second.id, "same container across ensure calls");
    assert_eq!(backend.call_count("create"), 1, "container created once");
    assert!(temp.path().join("output").is_dir(), "workspace created");
}

#[test]
fn ensure_restarts_a_stopped_container() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    let manager = manager_in(&temp, backend.clone());

    let created = manager.ensure().expect("ensure");
    manager.stop().expect("stop");

    let restarted = manager.ensure().expect("ensure after stop");
    assert_eq!(restarted.id, created.id, "restart keeps identity");
    assert_eq!(backend.call_count("create"), 1);
    assert_eq!(backend.call_count("start"), 1);
}

#[test]
fn remove_then_ensure_recreates_fresh() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    let manager = manager_in(&temp, backend.clone());

    let first = manager.ensure().expect("ensure");
    manager.remove().expect("remove");
    let second = manager.ensure().expect("ensure after remove");

    assert_ne!(first.id, second.id, "fresh container after removal");
    assert_eq!(backend.call_count("create"), 2);
}

#[test]
fn stop_and_remove_are_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    let manager = manager_in(&temp, backend);

    // Nothing was ever created; both must be clean no-ops.
    manager.stop().expect("stop without container");
    manager.remove().expect("remove without container");
}

#[test]
fn concurrent_execs_never_interleave() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.set_exec_delay(Duration::from_millis(30));
    let manager = manager_in(&temp, backend.clone());

    thread::scope(|scope| {
        for i in 0..4 {
            let manager = &manager;
            scope.spawn(move || {
                let command = format!("echo {i}");
                manager
                    .exec(&command, Duration::from_secs(5))
                    .expect("exec");
            });
        }
    });

    assert!(!backend.saw_overlap(), "exec calls must be serialized");
    let events = backend.events();
    assert_eq!(events.len(), 8, "four start/end pairs");
    for pair in events.chunks(2) {
        // Each start is immediately followed by its own end.
        assert_eq!(
            pair[0].replace("exec-start", "exec-end"),
            pair[1],
            "interleaved output: {events:?}"
        );
    }
}

#[test]
fn probe_reports_unavailable_as_an_answer_not_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.set_probe(Availability::Unavailable {
        reason: "daemon stopped".to_string(),
    });
    let manager = manager_in(&temp, backend);

    assert_eq!(
        manager.probe(),
        Availability::Unavailable {
            reason: "daemon stopped".to_string()
        }
    );
}

#[test]
fn transient_outage_is_retried() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.fail_next(1);
    let manager = manager_in(&temp, backend.clone());

    manager.ensure().expect("ensure recovers after one failure");
    assert_eq!(backend.call_count("inspect"), 2, "one retry");
}

#[test]
fn persistent_outage_surfaces_sandbox_unavailable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.fail_next(100);
    let manager = manager_in(&temp, backend.clone());

    let err = manager.ensure().expect_err("backend is down");
    assert!(
        err.is::<SandboxUnavailable>(),
        "caller can downcast the outage: {err:#}"
    );
    // Initial attempt plus the configured retries, then give up.
    let retries = test_sandbox_config().ensure_retries as usize;
    assert_eq!(backend.call_count("inspect"), retries + 1);
    assert!(
        !temp.path().join("output").exists(),
        "a failed ensure must not create the workspace"
    );
}

#[test]
fn command_timeout_is_data_with_conventional_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.set_exec_result(ExecOutput {
        stdout: "partial output".to_string(),
        stderr: String::new(),
        exit_code: -1,
        timed_out: true,
    });
    let manager = manager_in(&temp, backend);

    let started = Instant::now();
    let result = manager
        .exec("sleep 100", Duration::from_secs(1))
        .expect("timeout is not an error");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(!result.success());
    assert_eq!(result.stdout, "partial output", "partial capture preserved");
}

#[test]
fn nonzero_exit_is_ordinary_data() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backend = ScriptedBackend::new();
    backend.set_exec_result(ExecOutput {
        stdout: String::new(),
        stderr: "assertion failed".to_string(),
        exit_code: 1,
        timed_out: false,
    });
    let manager = manager_in(&temp, backend);

    let result = manager
        .exec("pytest", Duration::from_secs(5))
        .expect("failing command is still a result");
    assert_eq!(result.exit_code, 1);
    assert!(!result.success());
    assert_eq!(result.stderr, "assertion failed");
}
