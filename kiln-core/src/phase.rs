//! Subprocess phase execution
//!
//! Shared logic for both build phases: wire the child's combined
//! stdout/stderr to the append-only log file, spawn, then race the
//! child's natural exit against the governing cancellation token.
//! Whichever fires first decides the outcome.
//!
//! The two phases differ only in how a cancelled child is terminated:
//! a partially-cloned tree is disposable so the fetch child is killed
//! outright, while a build script may need to flush state, so the
//! execute child gets a graceful termination signal instead. Either
//! way the phase reports cancellation without waiting indefinitely
//! for the child to finish dying.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BuildError, PhaseKind};

/// How a phase terminates its child when cancellation wins the race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Forceful kill; the phase's partial results are disposable
    Kill,
    /// Graceful termination signal; the child may honor its own
    /// shutdown hook
    Graceful,
}

/// Result of one phase run
pub(crate) struct PhaseOutcome {
    /// Terminal exit information of the subprocess, when it was
    /// observed. `None` if the child never spawned or had not exited
    /// by the time cancellation was reported upward.
    pub exit: Option<ExitStatus>,
    /// `Ok` only when the subprocess exited successfully
    pub result: Result<(), BuildError>,
}

impl PhaseOutcome {
    fn failed(error: BuildError) -> Self {
        Self {
            exit: None,
            result: Err(error),
        }
    }
}

/// How long a phase waits for a terminated child's exit state before
/// handing the wait off to a background reaper.
const REAP_WAIT: Duration = Duration::from_millis(500);

/// Runs one phase subprocess to completion or cancellation.
///
/// The command arrives fully configured (program, args, cwd,
/// environment); its combined output is appended to `log_path`. The
/// log file is opened and closed per phase, so a crash mid-phase
/// still leaves a valid, readable partial log.
pub(crate) async fn run(
    kind: PhaseKind,
    mut command: Command,
    log_path: &Path,
    cancel: &CancellationToken,
    termination: Termination,
) -> PhaseOutcome {
    // Cancellation may have fired before this phase ever started;
    // abort without spawning or touching the log.
    if cancel.is_cancelled() {
        debug!("{} phase cancelled before spawn", kind);
        return PhaseOutcome::failed(BuildError::Cancelled { phase: kind });
    }

    let log = match open_log(log_path) {
        Ok(file) => file,
        Err(source) => {
            return PhaseOutcome::failed(BuildError::Setup {
                phase: kind,
                source,
            });
        }
    };
    let log_err = match log.try_clone() {
        Ok(file) => file,
        Err(source) => {
            return PhaseOutcome::failed(BuildError::Setup {
                phase: kind,
                source,
            });
        }
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            return PhaseOutcome::failed(BuildError::Spawn {
                phase: kind,
                source,
            });
        }
    };

    debug!("{} phase started (pid {:?})", kind, child.id());

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                debug!("{} phase completed successfully", kind);
                PhaseOutcome {
                    exit: Some(status),
                    result: Ok(()),
                }
            }
            Ok(status) => {
                debug!("{} phase failed with {}", kind, status);
                PhaseOutcome {
                    exit: Some(status),
                    result: Err(BuildError::Runtime {
                        phase: kind,
                        status,
                    }),
                }
            }
            Err(source) => PhaseOutcome {
                exit: None,
                result: Err(BuildError::Spawn {
                    phase: kind,
                    source,
                }),
            },
        },
        _ = cancel.cancelled() => {
            debug!("{} phase cancelled while running", kind);
            let exit = terminate(kind, child, termination).await;
            PhaseOutcome {
                exit,
                result: Err(BuildError::Cancelled { phase: kind }),
            }
        }
    }
}

fn open_log(log_path: &Path) -> std::io::Result<std::fs::File> {
    // Append, never truncate: the execute phase's output lands after
    // the fetch phase's in the same file.
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
}

/// Terminates a cancelled child and opportunistically captures its
/// exit state without blocking cancellation on a slow shutdown.
async fn terminate(
    kind: PhaseKind,
    mut child: Child,
    termination: Termination,
) -> Option<ExitStatus> {
    match termination {
        Termination::Kill => {
            if let Err(e) = child.kill().await {
                warn!("failed to kill {} process: {}", kind, e);
            }
            // Exit state is already cached after a successful kill.
            child.try_wait().ok().flatten()
        }
        Termination::Graceful => {
            send_term(kind, &mut child);
            match tokio::time::timeout(REAP_WAIT, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!("failed to reap {} process: {}", kind, e);
                    None
                }
                Err(_) => {
                    // Still shutting down; reap in the background so
                    // nothing leaks while cancellation reports upward.
                    tokio::spawn(async move {
                        let _ = child.wait().await;
                    });
                    None
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_term(kind: PhaseKind, child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // An already-reaped child has no id; nothing to signal.
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("failed to signal {} process (pid {}): {}", kind, pid, e);
        }
    }
}

#[cfg(not(unix))]
fn send_term(_kind: PhaseKind, child: &mut Child) {
    let _ = child.start_kill();
}
