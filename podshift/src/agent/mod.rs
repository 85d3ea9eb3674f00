//! Agent-side handlers: the destination half of a migration.
//!
//! These are the only places a migrated workload becomes live on the
//! destination. Handlers are idempotent in intent but not guarded: a
//! duplicate call re-executes the underlying tool operation. Every handler
//! runs the tool under the requesting user's identity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::errors::{MigrateError, MigrateResult};
use crate::exec::CheckpointTool;

/// How long the page server gets to start accepting connections.
const READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Destination-side migration handlers.
pub struct MigrationAgent {
    tool: Arc<dyn CheckpointTool>,
    page_server_port: u16,
    ready_timeout: Duration,
}

impl MigrationAgent {
    pub fn new(tool: Arc<dyn CheckpointTool>, page_server_port: u16) -> Self {
        Self {
            tool,
            page_server_port,
            ready_timeout: READY_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Prepare the destination for an incoming live dump: flip the
    /// checkpoint to memory-resident mode, start the restart-in-progress
    /// process acting as page server, and only report OK once it accepts
    /// connections, because the coordinator starts streaming pages
    /// immediately after.
    pub async fn launch_page_server(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()> {
        self.tool.configure_memory_mode(user, checkpoint).await?;
        tracing::info!(checkpoint, "checkpoint configured for memory mode");

        self.tool
            .launch_page_server(user, checkpoint, image_path, instance)
            .await?;
        self.wait_page_server_ready().await?;
        tracing::info!(instance, port = self.page_server_port, "page server accepting connections");
        Ok(())
    }

    /// Start the workload from the given checkpoint/image pair. Disk-based
    /// path only.
    pub async fn restart_container(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()> {
        self.tool
            .restart(user, checkpoint, image_path, instance)
            .await?;
        tracing::info!(instance, checkpoint, "restarted container from checkpoint");
        Ok(())
    }

    /// Finalize restoration of a workload whose checkpoint/image data has
    /// already arrived via page stream and bulk transfer. Diskless path
    /// only.
    pub async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()> {
        self.tool.restore(user, instance).await?;
        tracing::info!(instance, "restored container");
        Ok(())
    }

    async fn wait_page_server_ready(&self) -> MigrateResult<()> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            match TcpStream::connect(("127.0.0.1", self.page_server_port)).await {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() >= deadline => {
                    return Err(MigrateError::Tool(format!(
                        "page server on port {} not accepting connections: {e}",
                        self.page_server_port
                    )));
                }
                Err(_) => tokio::time::sleep(READY_PROBE_INTERVAL).await,
            }
        }
    }
}
