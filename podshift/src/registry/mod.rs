//! Checkpoint registry: resolves a (user, instance) pair to its checkpoint
//! identity and on-disk locations.
//!
//! Instance records are JSON files the container runtime writes under the
//! owning user's home directory. The registry is a read-only consumer with
//! one side effect: ghost records (whose parent process is gone) are
//! deleted when encountered.

mod instance;

pub use instance::{InstanceRecord, PARENT_MARKER};

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::{MigrateError, MigrateResult};

const RUNTIME_DIR: &str = ".apptainer";
const INSTANCES_SUBDIR: &str = "instances";
const APP_SUBDIR: &str = "app";
const CHECKPOINT_SUBDIR: &str = "checkpoint";
const IMAGE_SUBDIR: &str = "img";

/// Checkpoint identity of a running instance.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    /// Checkpoint identifier recorded for the instance.
    pub checkpoint: String,
    /// Container image path recorded for the instance.
    pub image: String,
}

/// Read-only snapshot of everything a migration needs from the registry.
///
/// Taken once at the start of a migration; if the instance changes
/// afterwards the snapshot goes stale. No revalidation happens mid-flight.
#[derive(Debug, Clone)]
pub struct CheckpointDescriptor {
    pub checkpoint: String,
    pub image: String,
    pub checkpoint_dir: PathBuf,
}

/// Resolution capability consumed by the coordinator.
#[async_trait]
pub trait CheckpointRegistry: Send + Sync {
    /// Resolve the checkpoint identity of a running instance.
    async fn get_status(&self, user: &str, instance: &str) -> MigrateResult<InstanceStatus>;

    /// Directory holding a checkpoint's image data.
    async fn checkpoint_dir(&self, user: &str, checkpoint: &str) -> MigrateResult<PathBuf>;

    /// Canonical location of the checkpoint's image directory.
    ///
    /// The `img` directory may be a symbolic link into a memory-backed
    /// mount; the live dump and the bulk transfer need its real location.
    async fn resolve_image_dir(&self, checkpoint_dir: &Path) -> MigrateResult<PathBuf>;
}

/// Registry backed by the runtime's per-user record files.
pub struct InstanceRegistry {
    /// When set, user homes resolve to `<base>/<user>` instead of the
    /// system user database. Lets tests lay out records in a scratch dir.
    home_base: Option<PathBuf>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self { home_base: None }
    }

    pub fn with_home_base(base: PathBuf) -> Self {
        Self {
            home_base: Some(base),
        }
    }

    fn user_home(&self, user: &str) -> MigrateResult<PathBuf> {
        if let Some(base) = &self.home_base {
            return Ok(base.join(user));
        }
        let entry = nix::unistd::User::from_name(user)
            .map_err(|e| MigrateError::Resolution(format!("user lookup for {user} failed: {e}")))?
            .ok_or_else(|| MigrateError::Resolution(format!("user {user} not found")))?;
        Ok(entry.dir)
    }

    /// Directory holding the per-instance record directories for a user.
    fn instances_dir(&self, user: &str) -> MigrateResult<PathBuf> {
        let hostname = nix::unistd::gethostname()
            .map_err(|e| MigrateError::Resolution(format!("hostname lookup failed: {e}")))?;
        Ok(self
            .user_home(user)?
            .join(RUNTIME_DIR)
            .join(INSTANCES_SUBDIR)
            .join(APP_SUBDIR)
            .join(hostname)
            .join(user))
    }

    /// Load the record for one instance, pruning it if it is a ghost.
    fn load_record(&self, user: &str, instance: &str) -> MigrateResult<InstanceRecord> {
        let record_path = self
            .instances_dir(user)?
            .join(instance)
            .join(format!("{instance}.json"));
        tracing::debug!(path = %record_path.display(), "loading instance record");

        let record = InstanceRecord::load(&record_path).map_err(|e| {
            MigrateError::Resolution(format!("no instance found with name {instance}: {e}"))
        })?;

        if record.is_exited() {
            tracing::warn!(instance, "pruning ghost instance record");
            if let Err(e) = record.delete() {
                tracing::warn!(instance, error = %e, "failed to delete ghost record");
            }
            return Err(MigrateError::Resolution(format!(
                "no instance found with name {instance}: parent process is gone"
            )));
        }

        Ok(record)
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointRegistry for InstanceRegistry {
    async fn get_status(&self, user: &str, instance: &str) -> MigrateResult<InstanceStatus> {
        let record = self.load_record(user, instance)?;
        if record.checkpoint.is_empty() {
            return Err(MigrateError::Resolution(format!(
                "instance {instance} has no checkpoint"
            )));
        }
        Ok(InstanceStatus {
            checkpoint: record.checkpoint,
            image: record.image,
        })
    }

    async fn checkpoint_dir(&self, user: &str, checkpoint: &str) -> MigrateResult<PathBuf> {
        Ok(self
            .user_home(user)?
            .join(RUNTIME_DIR)
            .join(CHECKPOINT_SUBDIR)
            .join(checkpoint))
    }

    async fn resolve_image_dir(&self, checkpoint_dir: &Path) -> MigrateResult<PathBuf> {
        let image_dir = checkpoint_dir.join(IMAGE_SUBDIR);
        tokio::fs::canonicalize(&image_dir).await.map_err(|e| {
            MigrateError::Resolution(format!(
                "failed to resolve image directory {}: {e}",
                image_dir.display()
            ))
        })
    }
}
