//! Checkpoint/restore tool surface.
//!
//! The tool is the container runtime CLI driving CRIU underneath. The
//! coordinator-side operations (dump, live dump, stop) run under the
//! service identity, mirroring how the requests are issued on the source
//! host; the agent-side operations (restart, page-server launch, restore)
//! run under the requesting user.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::MigrateResult;
use crate::exec::ProcessRunner;

/// Container runtime binary name.
pub const TOOL_BIN: &str = "apptainer";

/// External checkpoint/restore capability.
#[async_trait]
pub trait CheckpointTool: Send + Sync {
    /// Checkpoint the instance to its on-disk checkpoint directory.
    async fn dump(&self, instance: &str) -> MigrateResult<()>;

    /// Checkpoint the instance while streaming memory pages to the page
    /// server on `page_server`; non-memory state lands in the local
    /// memory-backed store.
    async fn dump_live(&self, instance: &str, page_server: &str) -> MigrateResult<()>;

    /// Stop the instance.
    async fn stop(&self, instance: &str) -> MigrateResult<()>;

    /// Start the workload from a checkpoint/image pair.
    async fn restart(
        &self,
        user: &str,
        checkpoint: &str,
        image_path: &str,
        instance: &str,
    ) -> MigrateResult<()>;

    /// Reconfigure the named checkpoint to memory-resident mode.
    async fn configure_memory_mode(&self, user: &str, checkpoint: &str) -> MigrateResult<()>;

    /// Start a restart-in-progress process operating as a page server for
    /// the checkpoint's incoming memory-page stream.
    async fn launch_page_server(
        &self,
        user: &str,
        checkpoint: &str,
        image_path: &str,
        instance: &str,
    ) -> MigrateResult<()>;

    /// Finalize restoration of an instance whose checkpoint/image data has
    /// already arrived.
    async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()>;
}

/// Production tool driving the container runtime CLI.
pub struct ApptainerTool {
    runner: Arc<dyn ProcessRunner>,
}

impl ApptainerTool {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CheckpointTool for ApptainerTool {
    async fn dump(&self, instance: &str) -> MigrateResult<()> {
        self.runner
            .run(TOOL_BIN, &["checkpoint", "instance", "--criu", instance])
            .await
    }

    async fn dump_live(&self, instance: &str, page_server: &str) -> MigrateResult<()> {
        self.runner
            .run(
                TOOL_BIN,
                &[
                    "checkpoint",
                    "instance",
                    "--criu",
                    "--page-server",
                    "--address",
                    page_server,
                    instance,
                ],
            )
            .await
    }

    async fn stop(&self, instance: &str) -> MigrateResult<()> {
        self.runner.run(TOOL_BIN, &["instance", "stop", instance]).await
    }

    async fn restart(
        &self,
        user: &str,
        checkpoint: &str,
        image_path: &str,
        instance: &str,
    ) -> MigrateResult<()> {
        self.runner
            .run_as(
                user,
                TOOL_BIN,
                &[
                    "instance",
                    "start",
                    "--criu-restart",
                    checkpoint,
                    image_path,
                    instance,
                ],
            )
            .await
    }

    async fn configure_memory_mode(&self, user: &str, checkpoint: &str) -> MigrateResult<()> {
        self.runner
            .run_as(user, TOOL_BIN, &["checkpoint", "config", checkpoint, "memory"])
            .await
    }

    async fn launch_page_server(
        &self,
        user: &str,
        checkpoint: &str,
        image_path: &str,
        instance: &str,
    ) -> MigrateResult<()> {
        self.runner
            .run_as(
                user,
                TOOL_BIN,
                &[
                    "instance",
                    "start",
                    "--criu-restart",
                    checkpoint,
                    "--page-server",
                    image_path,
                    instance,
                ],
            )
            .await
    }

    async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()> {
        self.runner
            .run_as(
                user,
                TOOL_BIN,
                &["checkpoint", "instance", "--criu", "--restore", instance],
            )
            .await
    }
}
