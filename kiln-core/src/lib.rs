//! Kiln Core
//!
//! The build-execution core behind the kiln service: given a
//! [`BuildDescriptor`] naming a source repository and a build script,
//! it fetches the source and runs the script as an isolated,
//! cancellable unit of work, capturing combined output and exit status.
//!
//! A build runs two strictly sequential subprocess phases:
//! - fetch: `git clone` of the requested source into the build's
//!   workspace, optionally using ephemeral private-key material
//! - execute: the literal build script, materialized to disk and run
//!   inside the checked-out tree
//!
//! Construction spawns the pipeline immediately as a background task;
//! the returned [`Build`] handle exposes cancellation, a one-shot
//! completion signal, and the final [`BuildReport`].
//!
//! # Example
//!
//! ```no_run
//! use kiln_core::{Build, BuildDescriptor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let descriptor = BuildDescriptor::new(
//!         "/tmp/build-1",
//!         "https://example.com/repo.git",
//!         "#!/bin/sh\nmake all\n",
//!     );
//!
//!     let build = Build::start(&CancellationToken::new(), descriptor);
//!     build.wait().await;
//!
//!     let report = build.report().expect("completed");
//!     println!("status: {:?}", report.status());
//! }
//! ```

pub mod build;
pub mod descriptor;
pub mod error;

mod phase;
mod workspace;

pub use build::{Build, BuildReport, BuildStatus};
pub use descriptor::BuildDescriptor;
pub use error::{BuildError, PhaseKind};
