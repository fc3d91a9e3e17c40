//! Error types for the build-execution core

use std::fmt;
use std::process::ExitStatus;
use thiserror::Error;

/// One of the two sequential subprocess stages of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Source retrieval (`git clone`)
    Fetch,
    /// Build script run
    Execute,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Errors that can occur while running a build
///
/// The first fatal error in either phase halts the pipeline; all
/// encountered errors accumulate in the build's error sequence so a
/// caller can tell "never started the script" from "script failed"
/// from "cancelled mid-fetch".
#[derive(Debug, Error)]
pub enum BuildError {
    /// Directory or file preparation failed before a subprocess started
    #[error("{phase} setup failed: {source}")]
    Setup {
        /// Phase being prepared
        phase: PhaseKind,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The subprocess could not be started or managed
    #[error("failed to spawn {phase} process: {source}")]
    Spawn {
        /// Phase whose subprocess failed to start
        phase: PhaseKind,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The subprocess started but exited with a failure status
    #[error("{phase} process exited with {status}")]
    Runtime {
        /// Phase whose subprocess failed
        phase: PhaseKind,
        /// Terminal exit status of the subprocess
        status: ExitStatus,
    },

    /// The governing context was cancelled while a phase was in flight
    #[error("build cancelled during {phase}")]
    Cancelled {
        /// Phase that was active when cancellation was observed
        phase: PhaseKind,
    },

    /// The log file could not be re-read after the run halted
    ///
    /// Recorded but does not change the success/failure outcome
    /// already determined by the phases.
    #[error("failed to read back build log: {0}")]
    Readback(#[source] std::io::Error),
}

impl BuildError {
    /// Check if this error reports cancellation rather than failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this error is a post-run log readback failure
    pub fn is_readback(&self) -> bool {
        matches!(self, Self::Readback(_))
    }
}
