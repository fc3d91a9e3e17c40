//! Workspace preparation and subprocess environment policy
//!
//! Everything a phase needs on disk before its subprocess starts:
//! the workspace directory, restricted-permission key material, and
//! the generated executable build script. Also owns the minimal
//! allow-listed environment both phases run under.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::fs;

use crate::descriptor::BuildDescriptor;
use crate::error::{BuildError, PhaseKind};

/// Environment variables forwarded from the host into build
/// subprocesses. Everything else is dropped: build environments stay
/// reproducible and do not leak unrelated process state.
const ENV_ALLOW_LIST: [&str; 4] = ["PATH", "SHELL", "USER", "LOGNAME"];

/// Minimal explicit environment for a phase subprocess.
///
/// `HOME` is pinned to the build's work dir rather than forwarded, so
/// git and ssh never read the host user's dotfiles (`~/.gitconfig`
/// rewrites, `~/.ssh/config`).
pub(crate) fn base_env(work_dir: &Path) -> Vec<(String, String)> {
    let mut env = vec![("HOME".to_string(), work_dir.display().to_string())];
    env.extend(
        ENV_ALLOW_LIST
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| ((*name).to_string(), v))),
    );
    env
}

/// `GIT_SSH_COMMAND` value pointing the fetch at the build's private
/// key exclusively. Host-key verification is skipped: an accepted
/// trade-off for ephemeral build sandboxes.
pub(crate) fn git_ssh_command(key_path: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
        key_path.display()
    )
}

/// Prepares the filesystem for the fetch phase: the workspace
/// directory the clone lands in, and the key material if supplied
/// (directory owner-only, key owner read/write only).
pub(crate) async fn prepare_fetch(descriptor: &BuildDescriptor) -> Result<(), BuildError> {
    let setup = |source| BuildError::Setup {
        phase: PhaseKind::Fetch,
        source,
    };

    fs::create_dir_all(descriptor.workspace_dir())
        .await
        .map_err(setup)?;

    if let Some(key) = &descriptor.ssh_key {
        let ssh_dir = descriptor.ssh_dir();
        fs::create_dir_all(&ssh_dir).await.map_err(setup)?;
        fs::set_permissions(&ssh_dir, Permissions::from_mode(0o700))
            .await
            .map_err(setup)?;

        let key_path = descriptor.ssh_key_path();
        fs::write(&key_path, key).await.map_err(setup)?;
        fs::set_permissions(&key_path, Permissions::from_mode(0o600))
            .await
            .map_err(setup)?;
    }

    Ok(())
}

/// Materializes the literal script contents to an owner-executable
/// file under the build's work dir.
pub(crate) async fn materialize_script(descriptor: &BuildDescriptor) -> Result<(), BuildError> {
    let setup = |source| BuildError::Setup {
        phase: PhaseKind::Execute,
        source,
    };

    let script_path = descriptor.script_path();
    fs::write(&script_path, &descriptor.build_script)
        .await
        .map_err(setup)?;
    fs::set_permissions(&script_path, Permissions::from_mode(0o700))
        .await
        .map_err(setup)?;

    Ok(())
}
