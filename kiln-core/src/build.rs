//! The Build Executor
//!
//! Owns a single build's lifecycle from construction to completion.
//! Construction spawns the two-phase pipeline (fetch, then execute)
//! as a background task immediately; the [`Build`] handle exposes
//! cancellation, a one-shot completion signal, and read access to
//! the final report.
//!
//! Synchronization contract: the completion signal is the only
//! synchronization primitive. All report fields are fixed once the
//! signal is observed; reading them earlier yields `None` rather than
//! a racy snapshot.

use std::process::ExitStatus;
use std::sync::{Arc, OnceLock};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::descriptor::BuildDescriptor;
use crate::error::{BuildError, PhaseKind};
use crate::phase::{self, Termination};
use crate::workspace;

/// Externally observable outcome of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// The pipeline has not completed yet
    Running,
    /// The error sequence is empty
    Succeeded,
    /// The error sequence contains a non-cancellation error
    Failed,
    /// The error sequence contains a cancellation error
    Cancelled,
}

/// Final state of a completed build
///
/// Populated exactly once, then read-only. Available through
/// [`Build::report`] only after the completion signal has fired.
#[derive(Debug)]
pub struct BuildReport {
    /// Ordered sequence of failures encountered; empty on success
    pub errors: Vec<BuildError>,
    /// Full captured content of the combined log file; populated
    /// best-effort even on cancellation or error so partial logs are
    /// never lost
    pub output: Vec<u8>,
    /// Exit information of the last subprocess that ran (clone or
    /// script); overwritten by each attempted phase, not a history
    pub process_state: Option<ExitStatus>,
}

impl BuildReport {
    /// Outcome derived from the error sequence: empty means success,
    /// a cancellation error means stopped on request, anything else
    /// means the build failed.
    pub fn status(&self) -> BuildStatus {
        let fatal = self.errors.iter().filter(|e| !e.is_readback());
        let mut any = false;
        for error in fatal {
            if error.is_cancellation() {
                return BuildStatus::Cancelled;
            }
            any = true;
        }
        if any {
            BuildStatus::Failed
        } else {
            BuildStatus::Succeeded
        }
    }
}

/// Handle to one running (or finished) build
///
/// Self-contained: one instance per build request, no shared locks.
/// The work dir named by the descriptor must not be shared with any
/// other build.
pub struct Build {
    descriptor: BuildDescriptor,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    report: Arc<OnceLock<BuildReport>>,
}

impl Build {
    /// Constructs a build and immediately starts the fetch phase in
    /// the background. Never blocks the caller; malformed descriptors
    /// surface as phase failures, not construction errors.
    ///
    /// `context` is the governing cancellation capability: cancelling
    /// it (e.g. on a caller-side deadline) cancels the build, as does
    /// [`Build::cancel`].
    pub fn start(context: &CancellationToken, descriptor: BuildDescriptor) -> Self {
        let cancel = context.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        let report = Arc::new(OnceLock::new());

        tokio::spawn(run_pipeline(
            descriptor.clone(),
            cancel.clone(),
            Arc::clone(&report),
            done_tx,
        ));

        Self {
            descriptor,
            cancel,
            done: done_rx,
            report,
        }
    }

    /// The descriptor this build was constructed from
    pub fn descriptor(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    /// Signals cooperative cancellation to whichever phase is active.
    ///
    /// Idempotent and non-blocking; the in-flight phase decides how
    /// to terminate its subprocess. Calling after completion is a
    /// no-op.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until the run has halted and the log has been read back.
    ///
    /// Observable by any number of waiters; returns immediately once
    /// the build is done.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    /// Whether the completion signal has fired
    pub fn is_done(&self) -> bool {
        self.report.get().is_some()
    }

    /// The final report, or `None` while the build is still running
    pub fn report(&self) -> Option<&BuildReport> {
        self.report.get()
    }

    /// Current externally observable state
    pub fn status(&self) -> BuildStatus {
        self.report()
            .map_or(BuildStatus::Running, BuildReport::status)
    }
}

/// The background pipeline: fetch, then execute, then log readback,
/// then the completion signal. The first fatal error halts the
/// pipeline; every path still reads back whatever log content exists.
async fn run_pipeline(
    descriptor: BuildDescriptor,
    cancel: CancellationToken,
    report: Arc<OnceLock<BuildReport>>,
    done_tx: watch::Sender<bool>,
) {
    info!("starting build of {}", descriptor.repo_url);

    let mut errors: Vec<BuildError> = Vec::new();
    let mut process_state: Option<ExitStatus> = None;
    let log_path = descriptor.log_path();

    let fetched = match workspace::prepare_fetch(&descriptor).await {
        Ok(()) => {
            let outcome = phase::run(
                PhaseKind::Fetch,
                fetch_command(&descriptor),
                &log_path,
                &cancel,
                Termination::Kill,
            )
            .await;
            process_state = outcome.exit;
            match outcome.result {
                Ok(()) => true,
                Err(e) => {
                    errors.push(e);
                    false
                }
            }
        }
        Err(e) => {
            errors.push(e);
            false
        }
    };

    // The script depends on the filesystem state the fetch produced;
    // it never runs unless the fetch unambiguously succeeded.
    if fetched {
        match workspace::materialize_script(&descriptor).await {
            Ok(()) => {
                let outcome = phase::run(
                    PhaseKind::Execute,
                    script_command(&descriptor),
                    &log_path,
                    &cancel,
                    Termination::Graceful,
                )
                .await;
                process_state = outcome.exit;
                if let Err(e) = outcome.result {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
    }

    // Read back whatever log content exists, on every path. A log
    // that was never created (cancelled before any spawn) is not a
    // readback failure.
    let output = match tokio::fs::read(&log_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            errors.push(BuildError::Readback(e));
            Vec::new()
        }
    };

    let outcome = BuildReport {
        errors,
        output,
        process_state,
    };
    info!(
        "build of {} finished: {:?}",
        descriptor.repo_url,
        outcome.status()
    );

    // Freeze the report before the signal fires so every observer of
    // the signal sees the final state.
    let _ = report.set(outcome);
    let _ = done_tx.send(true);
}

/// Retrieval invocation assembled from the descriptor's flags:
/// shallow unless a full clone was requested, submodule recursion
/// unless disabled, a specific branch if given.
fn fetch_command(descriptor: &BuildDescriptor) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("clone");

    if !descriptor.full_clone {
        cmd.args(["--depth", "1"]);
    }
    if descriptor.recursive {
        cmd.arg("--recurse-submodules");
    }
    if let Some(branch) = &descriptor.branch {
        cmd.args(["--branch", branch]);
    }

    cmd.arg(&descriptor.repo_url);
    cmd.arg(descriptor.clone_target());
    cmd.current_dir(&descriptor.work_dir);

    cmd.env_clear();
    cmd.envs(workspace::base_env(&descriptor.work_dir));
    if descriptor.ssh_key.is_some() {
        cmd.env(
            "GIT_SSH_COMMAND",
            workspace::git_ssh_command(&descriptor.ssh_key_path()),
        );
    }

    debug!("fetch command: {:?}", cmd.as_std());
    cmd
}

/// Script invocation: the generated executable, run inside the
/// checked-out tree under the same minimal environment (no key
/// material needed here).
fn script_command(descriptor: &BuildDescriptor) -> Command {
    let mut cmd = Command::new(descriptor.script_path());
    cmd.current_dir(descriptor.source_dir());
    cmd.env_clear();
    cmd.envs(workspace::base_env(&descriptor.work_dir));
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn report(errors: Vec<BuildError>) -> BuildReport {
        BuildReport {
            errors,
            output: Vec::new(),
            process_state: None,
        }
    }

    #[test]
    fn test_status_empty_errors_is_success() {
        assert_eq!(report(vec![]).status(), BuildStatus::Succeeded);
    }

    #[test]
    fn test_status_cancellation_wins() {
        let r = report(vec![BuildError::Cancelled {
            phase: PhaseKind::Execute,
        }]);
        assert_eq!(r.status(), BuildStatus::Cancelled);
    }

    #[test]
    fn test_status_other_errors_are_failure() {
        let r = report(vec![BuildError::Setup {
            phase: PhaseKind::Fetch,
            source: std::io::Error::other("boom"),
        }]);
        assert_eq!(r.status(), BuildStatus::Failed);
    }

    #[test]
    fn test_status_readback_alone_does_not_fail() {
        // Readback problems are recorded but do not change the
        // outcome the phases determined.
        let r = report(vec![BuildError::Readback(std::io::Error::new(
            ErrorKind::PermissionDenied,
            "denied",
        ))]);
        assert_eq!(r.status(), BuildStatus::Succeeded);
    }

    #[test]
    fn test_fetch_command_default_flags() {
        let d = BuildDescriptor::new("/tmp/w", "https://example.com/repo.git", "");
        let cmd = fetch_command(&d);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            [
                "clone",
                "--depth",
                "1",
                "--recurse-submodules",
                "https://example.com/repo.git",
                "workspace/repo",
            ]
        );
    }

    #[test]
    fn test_fetch_command_full_clone_with_branch() {
        let mut d = BuildDescriptor::new("/tmp/w", "https://example.com/repo.git", "");
        d.full_clone = true;
        d.recursive = false;
        d.branch = Some("release".to_string());

        let cmd = fetch_command(&d);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            [
                "clone",
                "--branch",
                "release",
                "https://example.com/repo.git",
                "workspace/repo",
            ]
        );
    }

    #[test]
    fn test_fetch_command_env_is_minimal() {
        let mut d = BuildDescriptor::new("/tmp/w", "git@example.com:org/repo.git", "");
        d.ssh_key = Some("key".to_string());

        let cmd = fetch_command(&d);
        let envs: Vec<(String, String)> = cmd
            .as_std()
            .get_envs()
            .filter_map(|(k, v)| {
                v.map(|v| {
                    (
                        k.to_string_lossy().into_owned(),
                        v.to_string_lossy().into_owned(),
                    )
                })
            })
            .collect();

        for (name, _) in &envs {
            assert!(
                ["HOME", "PATH", "SHELL", "USER", "LOGNAME", "GIT_SSH_COMMAND"]
                    .contains(&name.as_str()),
                "unexpected variable {name}"
            );
        }
        assert!(envs.iter().any(|(n, _)| n == "GIT_SSH_COMMAND"));
        assert!(
            envs.iter().any(|(n, v)| n == "HOME" && v == "/tmp/w"),
            "HOME must be the build's work dir"
        );
    }

    #[test]
    fn test_script_command_runs_inside_checkout() {
        let d = BuildDescriptor::new("/tmp/w", "https://example.com/repo.git", "#!/bin/sh\n");
        let cmd = script_command(&d);
        assert_eq!(
            cmd.as_std().get_current_dir(),
            Some(std::path::Path::new("/tmp/w/workspace/repo"))
        );
        assert_eq!(cmd.as_std().get_program(), std::path::Path::new("/tmp/w/build").as_os_str());
    }
}
