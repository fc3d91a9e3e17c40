//! Registry of concurrently running builds
//!
//! Keyed by a server-assigned id; the core itself exposes no
//! identifier. Submission allocates an exclusive work dir under the
//! configured build root and constructs the build under the server's
//! root cancellation token, so shutdown cancels every in-flight
//! build. A janitor task per build evicts the entry and deletes the
//! work dir once the retention period after completion has passed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::{Build, BuildDescriptor};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

fn default_recursive() -> bool {
    true
}

/// Build submission payload
///
/// Everything a [`BuildDescriptor`] needs except the work dir, which
/// the registry allocates.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildRequest {
    pub repo_url: String,
    pub build_script: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub full_clone: bool,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default)]
    pub checkout_dir: Option<String>,
}

/// In-memory map of builds keyed by id
pub struct Registry {
    builds: Arc<RwLock<HashMap<Uuid, Arc<Build>>>>,
    build_root: PathBuf,
    retention: Duration,
    context: CancellationToken,
}

impl Registry {
    /// Creates a registry rooted at the configured build directory.
    ///
    /// `context` is the server's root cancellation token; every build
    /// runs under a child of it.
    pub fn new(config: &Config, context: CancellationToken) -> Self {
        Self {
            builds: Arc::new(RwLock::new(HashMap::new())),
            build_root: config.build_root.clone(),
            retention: config.retention,
            context,
        }
    }

    /// Allocates a work dir, starts the build, and returns its id.
    ///
    /// The core imposes no limit on concurrent builds and neither
    /// does the registry; each build owns a disjoint work dir.
    pub async fn submit(&self, request: BuildRequest) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let work_dir = self.build_root.join(id.to_string());
        tokio::fs::create_dir_all(&work_dir).await?;

        let descriptor = BuildDescriptor {
            work_dir,
            build_script: request.build_script,
            repo_url: request.repo_url,
            ssh_key: request.ssh_key,
            branch: request.branch,
            full_clone: request.full_clone,
            recursive: request.recursive,
            checkout_dir: request.checkout_dir,
        };

        info!("submitting build {} for {}", id, descriptor.repo_url);
        let build = Arc::new(Build::start(&self.context, descriptor));

        self.builds.write().await.insert(id, Arc::clone(&build));
        self.spawn_janitor(id, build);

        Ok(id)
    }

    /// Looks up a build handle by id
    pub async fn get(&self, id: Uuid) -> Option<Arc<Build>> {
        self.builds.read().await.get(&id).cloned()
    }

    /// Forwards cancellation to the build; returns false for an
    /// unknown id. Idempotent like the handle itself.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.get(id).await {
            Some(build) => {
                info!("cancelling build {}", id);
                build.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of registered builds (running or retained)
    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.builds.read().await.len()
    }

    /// Whether any builds are registered
    #[allow(dead_code)]
    pub async fn is_empty(&self) -> bool {
        self.builds.read().await.is_empty()
    }

    /// Waits for the build to finish, then evicts it and removes its
    /// work dir after the retention period.
    fn spawn_janitor(&self, id: Uuid, build: Arc<Build>) {
        let builds = Arc::clone(&self.builds);
        let retention = self.retention;

        tokio::spawn(async move {
            build.wait().await;
            debug!("build {} finished, retaining for {:?}", id, retention);
            tokio::time::sleep(retention).await;

            builds.write().await.remove(&id);
            let work_dir = build.descriptor().work_dir.clone();
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                warn!("failed to remove work dir for build {}: {}", id, e);
            } else {
                debug!("evicted build {}", id);
            }
        });
    }
}
