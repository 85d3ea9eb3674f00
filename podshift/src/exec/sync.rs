//! Directory replication to a remote host.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::MigrateResult;
use crate::exec::ProcessRunner;

/// Replicates a directory tree to the same path on a remote host. Only used
/// when the hosts do not share a filesystem.
#[async_trait]
pub trait DirectorySync: Send + Sync {
    async fn sync(&self, user: &str, dir: &Path, target: &str) -> MigrateResult<()>;
}

/// rsync-over-ssh replication, mirrored to the identical remote path.
pub struct Rsync {
    runner: Arc<dyn ProcessRunner>,
}

impl Rsync {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl DirectorySync for Rsync {
    async fn sync(&self, user: &str, dir: &Path, target: &str) -> MigrateResult<()> {
        let source = dir.display().to_string();
        let destination = format!("{user}@{target}:{source}");
        tracing::info!(%source, %destination, "replicating directory");
        self.runner.run("rsync", &["-av", &source, &destination]).await
    }
}
