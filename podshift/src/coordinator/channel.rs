//! Typed handle to the remote agent's RPC surface.
//!
//! The coordinator never touches the gRPC client directly; it dials through
//! [`AgentConnector`] and talks through [`AgentChannel`], so the state
//! machines can run against fakes.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;

use crate::errors::{MigrateError, MigrateResult};
use crate::rpc::pb;
use crate::rpc::pb::migration_client::MigrationClient;

/// How long a dial may take before it is a transport failure.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The three agent-side calls a coordinator makes during a migration.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    async fn launch_page_server(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()>;

    async fn restart_container(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()>;

    async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()>;
}

/// Dials a target host's control endpoint.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, target: &str) -> MigrateResult<Box<dyn AgentChannel>>;
}

/// Production connector: gRPC over the configured control port.
pub struct GrpcConnector {
    control_port: u16,
    rpc_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(control_port: u16, rpc_timeout: Duration) -> Self {
        Self {
            control_port,
            rpc_timeout,
        }
    }
}

#[async_trait]
impl AgentConnector for GrpcConnector {
    async fn connect(&self, target: &str) -> MigrateResult<Box<dyn AgentChannel>> {
        let url = format!("http://{target}:{}", self.control_port);
        let endpoint = Endpoint::from_shared(url.clone())
            .map_err(|e| MigrateError::Transport(format!("invalid target {target}: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| MigrateError::Transport(format!("failed to connect to {url}: {e}")))?;
        Ok(Box::new(GrpcChannel {
            client: MigrationClient::new(channel),
            rpc_timeout: self.rpc_timeout,
        }))
    }
}

struct GrpcChannel {
    client: MigrationClient<tonic::transport::Channel>,
    rpc_timeout: Duration,
}

/// A peer that answers with a non-OK status is a remote failure, distinct
/// from a transport failure where it never answered.
fn check(op: &str, status: i32) -> MigrateResult<()> {
    if status == pb::MigrationStatus::Ok as i32 {
        Ok(())
    } else {
        Err(MigrateError::Remote(format!("{op} returned FAIL")))
    }
}

#[async_trait]
impl AgentChannel for GrpcChannel {
    async fn launch_page_server(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()> {
        let mut client = self.client.clone();
        let request = pb::LaunchPageServerRequest {
            user: user.into(),
            instance: instance.into(),
            checkpoint_id: checkpoint.into(),
            image_path: image_path.into(),
        };
        let response = tokio::time::timeout(self.rpc_timeout, client.launch_page_server(request))
            .await
            .map_err(|_| MigrateError::Timeout("LaunchPageServer rpc timed out".into()))??;
        check("LaunchPageServer", response.into_inner().status)
    }

    async fn restart_container(
        &self,
        user: &str,
        instance: &str,
        checkpoint: &str,
        image_path: &str,
    ) -> MigrateResult<()> {
        let mut client = self.client.clone();
        let request = pb::RestartContainerRequest {
            user: user.into(),
            instance: instance.into(),
            checkpoint_id: checkpoint.into(),
            image_path: image_path.into(),
        };
        let response = tokio::time::timeout(self.rpc_timeout, client.restart_container(request))
            .await
            .map_err(|_| MigrateError::Timeout("RestartContainer rpc timed out".into()))??;
        check("RestartContainer", response.into_inner().status)
    }

    async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()> {
        let mut client = self.client.clone();
        let request = pb::RestoreRequest {
            user: user.into(),
            instance: instance.into(),
        };
        let response = tokio::time::timeout(self.rpc_timeout, client.restore(request))
            .await
            .map_err(|_| MigrateError::Timeout("Restore rpc timed out".into()))??;
        check("Restore", response.into_inner().status)
    }
}
