//! Migration coordinator: drives the disk-based and diskless state machines
//! to completion or first fatal failure.
//!
//! Every step runs strictly after its predecessor returned, with one
//! deliberate exception: stopping the source instance is fire-and-forget,
//! so teardown races the remaining steps. A fatal failure after the stop
//! has fired leaves the source stopped with no restored destination; that
//! is an accepted outcome of this design, not a bug to paper over.

mod channel;

pub use channel::{AgentChannel, AgentConnector, GrpcConnector};

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::errors::MigrateResult;
use crate::exec::{CheckpointTool, DirectorySync};
use crate::options::ServiceOptions;
use crate::registry::{CheckpointDescriptor, CheckpointRegistry};
use crate::transfer::BulkTransfer;

/// Source-side driver for both migration paths.
pub struct MigrationCoordinator {
    registry: Arc<dyn CheckpointRegistry>,
    tool: Arc<dyn CheckpointTool>,
    sync: Arc<dyn DirectorySync>,
    connector: Arc<dyn AgentConnector>,
    bulk: Arc<dyn BulkTransfer>,
    shared_fs: bool,
    transfer_port: u16,
}

impl MigrationCoordinator {
    pub fn new(
        registry: Arc<dyn CheckpointRegistry>,
        tool: Arc<dyn CheckpointTool>,
        sync: Arc<dyn DirectorySync>,
        connector: Arc<dyn AgentConnector>,
        bulk: Arc<dyn BulkTransfer>,
        options: &ServiceOptions,
    ) -> Self {
        Self {
            registry,
            tool,
            sync,
            connector,
            bulk,
            shared_fs: options.shared_fs,
            transfer_port: options.transfer_port,
        }
    }

    /// Disk-based migration: checkpoint to disk, replicate the checkpoint
    /// directory when the filesystems are not shared, restart remotely.
    pub async fn migrate(&self, user: &str, instance: &str, target: &str) -> MigrateResult<()> {
        tracing::info!(user, instance, target, "migrate request received");

        // The status query below is the authoritative failure signal; the
        // tool reports transient errors even on a usable checkpoint.
        if let Err(e) = self.tool.dump(instance).await {
            tracing::warn!(instance, error = %e, "checkpoint dump reported an error");
        }

        let descriptor = self.resolve_descriptor(user, instance).await?;
        tracing::info!(
            instance,
            checkpoint = %descriptor.checkpoint,
            "dumped instance to checkpoint"
        );

        let _stop = self.spawn_stop(instance);

        if !self.shared_fs {
            self.sync
                .sync(user, &descriptor.checkpoint_dir, target)
                .await?;
        }

        let channel = self.connector.connect(target).await?;
        channel
            .restart_container(user, instance, &descriptor.checkpoint, &descriptor.image)
            .await?;
        tracing::info!(instance, target, "restarted container on destination");
        Ok(())
    }

    /// Diskless migration: memory pages stream straight to the
    /// destination's page server during the dump; the remaining image data
    /// follows over the bulk channel.
    pub async fn diskless_migrate(
        &self,
        user: &str,
        instance: &str,
        target: &str,
    ) -> MigrateResult<()> {
        tracing::info!(user, instance, target, "diskless migrate request received");

        let descriptor = self.resolve_descriptor(user, instance).await?;
        let image_dir = self
            .registry
            .resolve_image_dir(&descriptor.checkpoint_dir)
            .await?;
        tracing::info!(image_dir = %image_dir.display(), "resolved image directory");

        // Warm the destination before the page server exists.
        if !self.shared_fs {
            self.sync
                .sync(user, &descriptor.checkpoint_dir, target)
                .await?;
        }

        // The page server must be listening before the dump streams pages
        // at it; the blocking call enforces that ordering.
        let channel = self.connector.connect(target).await?;
        channel
            .launch_page_server(user, instance, &descriptor.checkpoint, &descriptor.image)
            .await?;
        tracing::info!(instance, target, "page server launched on destination");

        if let Err(e) = self.tool.dump_live(instance, target).await {
            tracing::warn!(instance, error = %e, "live dump reported an error");
        }

        // Pick up log/state files written during the dump.
        if !self.shared_fs {
            self.sync
                .sync(user, &descriptor.checkpoint_dir, target)
                .await?;
        }

        let _stop = self.spawn_stop(instance);

        let transfer_addr = format!("{target}:{}", self.transfer_port);
        self.bulk.push(&transfer_addr, &image_dir).await?;
        tracing::info!(instance, "image directory transferred");

        channel.restore(user, instance).await?;
        tracing::info!(instance, target, "restored container on destination");
        Ok(())
    }

    /// Take the registry snapshot every migration starts from. Fatal on
    /// failure: without a checkpoint identity there is nothing to move.
    async fn resolve_descriptor(
        &self,
        user: &str,
        instance: &str,
    ) -> MigrateResult<CheckpointDescriptor> {
        let status = self.registry.get_status(user, instance).await?;
        let checkpoint_dir = self
            .registry
            .checkpoint_dir(user, &status.checkpoint)
            .await?;
        Ok(CheckpointDescriptor {
            checkpoint: status.checkpoint,
            image: status.image,
            checkpoint_dir,
        })
    }

    /// Stop the source instance without gating on the result. The handle is
    /// returned so a caller may await teardown for cleanup; the migration
    /// itself never does.
    fn spawn_stop(&self, instance: &str) -> JoinHandle<()> {
        let tool = Arc::clone(&self.tool);
        let instance = instance.to_string();
        tokio::spawn(async move {
            if let Err(e) = tool.stop(&instance).await {
                tracing::warn!(instance = %instance, error = %e, "failed to stop source instance");
            }
        })
    }
}
