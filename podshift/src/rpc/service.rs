//! The migration service: every host serves all five methods and plays
//! coordinator or agent per call.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::pb;
use crate::agent::MigrationAgent;
use crate::coordinator::{GrpcConnector, MigrationCoordinator};
use crate::exec::{ApptainerTool, CheckpointTool, ProcessRunner, Rsync, SystemRunner};
use crate::options::ServiceOptions;
use crate::registry::InstanceRegistry;
use crate::transfer::BulkSender;

/// One service object exposes the whole RPC surface; the caller of
/// Migrate/DisklessMigrate makes this host the coordinator for that
/// transfer while it keeps serving as agent for others.
pub struct MigrationService {
    coordinator: MigrationCoordinator,
    agent: MigrationAgent,
}

impl MigrationService {
    /// Production wiring: real registry, subprocess tool, rsync, gRPC
    /// connector.
    pub fn new(options: &ServiceOptions) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new(options.tool_timeout));
        let tool: Arc<dyn CheckpointTool> = Arc::new(ApptainerTool::new(Arc::clone(&runner)));
        let coordinator = MigrationCoordinator::new(
            Arc::new(InstanceRegistry::new()),
            Arc::clone(&tool),
            Arc::new(Rsync::new(runner)),
            Arc::new(GrpcConnector::new(options.control_port, options.rpc_timeout)),
            Arc::new(BulkSender),
            options,
        );
        let agent = MigrationAgent::new(tool, options.page_server_port);
        Self { coordinator, agent }
    }

    /// Assemble from pre-built halves. Lets tests wire in fakes.
    pub fn with_parts(coordinator: MigrationCoordinator, agent: MigrationAgent) -> Self {
        Self { coordinator, agent }
    }
}

/// Collapse a step outcome into the OK/FAIL the caller sees, logging the
/// failed step for the operator.
fn outcome(op: &str, instance: &str, result: crate::errors::MigrateResult<()>) -> i32 {
    match result {
        Ok(()) => pb::MigrationStatus::Ok as i32,
        Err(e) => {
            tracing::error!(instance, error = %e, "{op} failed");
            pb::MigrationStatus::Fail as i32
        }
    }
}

#[tonic::async_trait]
impl pb::migration_server::Migration for MigrationService {
    async fn migrate(
        &self,
        request: Request<pb::MigrateRequest>,
    ) -> Result<Response<pb::MigrateResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .coordinator
            .migrate(&req.user, &req.instance, &req.target)
            .await;
        Ok(Response::new(pb::MigrateResponse {
            status: outcome("migrate", &req.instance, result),
        }))
    }

    async fn diskless_migrate(
        &self,
        request: Request<pb::DisklessMigrateRequest>,
    ) -> Result<Response<pb::DisklessMigrateResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .coordinator
            .diskless_migrate(&req.user, &req.instance, &req.target)
            .await;
        Ok(Response::new(pb::DisklessMigrateResponse {
            status: outcome("diskless migrate", &req.instance, result),
        }))
    }

    async fn launch_page_server(
        &self,
        request: Request<pb::LaunchPageServerRequest>,
    ) -> Result<Response<pb::LaunchPageServerResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .agent
            .launch_page_server(&req.user, &req.instance, &req.checkpoint_id, &req.image_path)
            .await;
        Ok(Response::new(pb::LaunchPageServerResponse {
            status: outcome("launch page server", &req.instance, result),
        }))
    }

    async fn restart_container(
        &self,
        request: Request<pb::RestartContainerRequest>,
    ) -> Result<Response<pb::RestartContainerResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .agent
            .restart_container(&req.user, &req.instance, &req.checkpoint_id, &req.image_path)
            .await;
        Ok(Response::new(pb::RestartContainerResponse {
            status: outcome("restart container", &req.instance, result),
        }))
    }

    async fn restore(
        &self,
        request: Request<pb::RestoreRequest>,
    ) -> Result<Response<pb::RestoreResponse>, Status> {
        let req = request.into_inner();
        let result = self.agent.restore(&req.user, &req.instance).await;
        Ok(Response::new(pb::RestoreResponse {
            status: outcome("restore", &req.instance, result),
        }))
    }
}
