//! Control-plane server bootstrap.

use std::net::SocketAddr;

use super::pb::migration_server::MigrationServer;
use super::service::MigrationService;
use crate::errors::{MigrateError, MigrateResult};

/// Serve the migration service on the control port until process exit.
pub async fn serve(service: MigrationService, addr: SocketAddr) -> MigrateResult<()> {
    tracing::info!(%addr, "control server listening");
    tonic::transport::Server::builder()
        .add_service(MigrationServer::new(service))
        .serve(addr)
        .await
        .map_err(|e| MigrateError::Transport(format!("control server failed: {e}")))
}
