//! Build descriptor and on-disk workspace layout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_recursive() -> bool {
    true
}

/// Immutable specification of what to fetch and what to run.
///
/// Created by the caller before execution begins. The `work_dir` must
/// be exclusively owned by this build; every artifact (log, key
/// material, checked-out source, generated script) lives under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDescriptor {
    /// Filesystem path exclusively owned by this build
    pub work_dir: PathBuf,

    /// Literal script contents (not a path) to materialize and execute
    pub build_script: String,

    /// Source repository URL
    pub repo_url: String,

    /// Private key material for the fetch, written to a
    /// restricted-permission file before cloning
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Specific branch to clone, if any
    #[serde(default)]
    pub branch: Option<String>,

    /// Full history instead of the default shallow (depth 1) clone
    #[serde(default)]
    pub full_clone: bool,

    /// Recurse into submodules (on unless explicitly disabled)
    #[serde(default = "default_recursive")]
    pub recursive: bool,

    /// Override for the checkout subdirectory name; defaults to the
    /// URL's base name with a trailing `.git` stripped
    #[serde(default)]
    pub checkout_dir: Option<String>,
}

impl BuildDescriptor {
    /// Creates a descriptor with default source flags (shallow clone,
    /// submodule recursion on, no key, no branch override).
    pub fn new(
        work_dir: impl Into<PathBuf>,
        repo_url: impl Into<String>,
        build_script: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            build_script: build_script.into(),
            repo_url: repo_url.into(),
            ssh_key: None,
            branch: None,
            full_clone: false,
            recursive: default_recursive(),
            checkout_dir: None,
        }
    }

    /// Name of the subdirectory the source is checked out into.
    ///
    /// The override wins when present; otherwise the URL's base name
    /// with a trailing `.git` stripped.
    pub fn checkout_dir_name(&self) -> String {
        if let Some(dir) = &self.checkout_dir {
            return dir.clone();
        }

        let base = self
            .repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.repo_url);

        base.strip_suffix(".git").unwrap_or(base).to_string()
    }

    /// Combined log file, append-only across both phases
    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join("output.log")
    }

    /// Generated executable build script
    pub fn script_path(&self) -> PathBuf {
        self.work_dir.join("build")
    }

    /// Directory holding private key material, if any
    pub fn ssh_dir(&self) -> PathBuf {
        self.work_dir.join(".ssh")
    }

    /// Private key file used by the fetch phase
    pub fn ssh_key_path(&self) -> PathBuf {
        self.ssh_dir().join("id")
    }

    /// Parent directory of the checkout
    pub fn workspace_dir(&self) -> PathBuf {
        self.work_dir.join("workspace")
    }

    /// Checked-out source tree (the execute phase's working directory)
    pub fn source_dir(&self) -> PathBuf {
        self.workspace_dir().join(self.checkout_dir_name())
    }

    /// Checkout target relative to `work_dir` (the fetch phase's
    /// working directory), as handed to `git clone`
    pub(crate) fn clone_target(&self) -> PathBuf {
        Path::new("workspace").join(self.checkout_dir_name())
    }
}
