//! End-to-end build executor tests
//!
//! Descriptor-level behavior: pipeline ordering, cancellation
//! semantics, and the completion-signal contract. Tests that need a
//! real `git` binary build a local fixture repository and skip
//! themselves when git is not installed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::{Build, BuildDescriptor, BuildStatus};
use tokio_util::sync::CancellationToken;

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Creates a single-commit repository to clone from.
fn init_fixture_repo(dir: &Path) {
    let git = |args: &[&str]| {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    };

    git(&["init"]);
    std::fs::write(dir.join("README.md"), "fixture\n").unwrap();
    git(&["add", "."]);
    git(&[
        "-c",
        "user.name=kiln",
        "-c",
        "user.email=kiln@example.com",
        "commit",
        "-m",
        "init",
    ]);
}

#[tokio::test]
async fn fetch_failure_stops_pipeline_before_script() {
    let work = tempfile::tempdir().unwrap();
    let descriptor = BuildDescriptor::new(
        work.path(),
        "/nonexistent/kiln-test-repo",
        "#!/bin/sh\necho should-not-run\n",
    );

    let build = Build::start(&CancellationToken::new(), descriptor);
    build.wait().await;

    let report = build.report().expect("completed");
    assert_eq!(report.status(), BuildStatus::Failed);
    assert!(!report.errors.is_empty());
    assert!(report.errors.iter().all(|e| !e.is_cancellation()));

    // The execute phase never ran: no script was materialized and the
    // log holds no script output.
    assert!(!build.descriptor().script_path().exists());
    let log = String::from_utf8_lossy(&report.output);
    assert!(!log.contains("should-not-run"));
}

#[tokio::test]
async fn cancel_before_any_spawn_yields_cancellation_and_empty_log() {
    let work = tempfile::tempdir().unwrap();
    let descriptor = BuildDescriptor::new(
        work.path(),
        "https://example.com/repo.git",
        "#!/bin/sh\necho hi\n",
    );

    let context = CancellationToken::new();
    context.cancel();

    let build = Build::start(&context, descriptor);
    build.wait().await;

    let report = build.report().expect("completed");
    assert_eq!(report.status(), BuildStatus::Cancelled);
    assert!(report.errors.iter().any(|e| e.is_cancellation()));
    assert!(report.output.is_empty());
    assert!(report.process_state.is_none());
}

#[tokio::test]
async fn completion_signal_serves_many_waiters_and_repeated_cancel() {
    let work = tempfile::tempdir().unwrap();
    let descriptor = BuildDescriptor::new(
        work.path(),
        "/nonexistent/kiln-test-repo",
        "#!/bin/sh\ntrue\n",
    );

    let build = Arc::new(Build::start(&CancellationToken::new(), descriptor));

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let build = Arc::clone(&build);
        waiters.push(tokio::spawn(async move {
            build.wait().await;
            assert!(build.is_done());
        }));
    }
    for waiter in waiters {
        waiter.await.unwrap();
    }

    // Cancelling after completion, repeatedly, must not panic or
    // disturb the settled report.
    build.cancel();
    build.cancel();
    build.wait().await;

    // Repeated reads return the same frozen report.
    let first = build.report().expect("completed");
    let second = build.report().expect("completed");
    assert!(std::ptr::eq(first, second));
    assert_eq!(first.status(), build.status());
}

#[tokio::test]
async fn successful_build_appends_fetch_then_script_output() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let upstream = tempfile::tempdir().unwrap();
    init_fixture_repo(upstream.path());

    let work = tempfile::tempdir().unwrap();
    let descriptor = BuildDescriptor::new(
        work.path(),
        upstream.path().to_string_lossy().into_owned(),
        "#!/bin/sh\necho hello\n",
    );

    let build = Build::start(&CancellationToken::new(), descriptor);
    build.wait().await;

    let report = build.report().expect("completed");
    assert_eq!(report.status(), BuildStatus::Succeeded);
    assert!(report.errors.is_empty());
    assert_eq!(report.process_state.and_then(|s| s.code()), Some(0));

    // The clone's output precedes the script's in the combined log.
    let log = String::from_utf8_lossy(&report.output);
    assert!(log.ends_with("hello\n"), "log was: {log}");

    // The checkout landed where the script expects to run.
    assert!(build.descriptor().source_dir().join("README.md").is_file());
}

#[tokio::test]
async fn cancel_during_script_is_graceful_and_keeps_partial_output() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let upstream = tempfile::tempdir().unwrap();
    init_fixture_repo(upstream.path());

    let work = tempfile::tempdir().unwrap();
    let descriptor = BuildDescriptor::new(
        work.path(),
        upstream.path().to_string_lossy().into_owned(),
        "#!/bin/sh\necho started\nsleep 30\necho finished\n",
    );
    let log_path = descriptor.log_path();

    let build = Build::start(&CancellationToken::new(), descriptor);

    // Wait until the script is demonstrably running, then cancel.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        if let Ok(log) = std::fs::read_to_string(&log_path) {
            if log.contains("started") {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "script never produced output"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    build.cancel();
    build.wait().await;

    let report = build.report().expect("completed");
    assert_eq!(report.status(), BuildStatus::Cancelled);

    // Output up to the termination signal survives; the tail after
    // the interrupted sleep does not.
    let log = String::from_utf8_lossy(&report.output);
    assert!(log.contains("started"));
    assert!(!log.contains("finished"));
}
