//! End-to-end migration over a real gRPC pair: one in-process service per
//! "host", fakes only at the registry and tool seams.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::TcpListenerStream;

use podshift::MigrationService;
use podshift::ServiceOptions;
use podshift::agent::MigrationAgent;
use podshift::coordinator::{GrpcConnector, MigrationCoordinator};
use podshift::errors::{MigrateError, MigrateResult};
use podshift::exec::{CheckpointTool, DirectorySync};
use podshift::registry::{CheckpointRegistry, InstanceStatus};
use podshift::rpc::pb;
use podshift::rpc::pb::migration_client::MigrationClient;
use podshift::rpc::pb::migration_server::MigrationServer;
use podshift::transfer::BulkTransfer;

type EventLog = Arc<Mutex<Vec<String>>>;

fn events() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn log(events: &EventLog, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

fn recorded(events: &EventLog, prefix: &str) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .count()
}

struct FakeRegistry {
    fail_status: bool,
}

#[async_trait]
impl CheckpointRegistry for FakeRegistry {
    async fn get_status(&self, _user: &str, instance: &str) -> MigrateResult<InstanceStatus> {
        if self.fail_status {
            return Err(MigrateError::Resolution(format!(
                "no instance found with name {instance}"
            )));
        }
        Ok(InstanceStatus {
            checkpoint: "ckpt-1".into(),
            image: "/images/web1.sif".into(),
        })
    }

    async fn checkpoint_dir(&self, _user: &str, checkpoint: &str) -> MigrateResult<PathBuf> {
        Ok(PathBuf::from(format!("/ckpt/{checkpoint}")))
    }

    async fn resolve_image_dir(&self, checkpoint_dir: &Path) -> MigrateResult<PathBuf> {
        Ok(checkpoint_dir.join("img"))
    }
}

struct FakeTool {
    events: EventLog,
}

#[async_trait]
impl CheckpointTool for FakeTool {
    async fn dump(&self, instance: &str) -> MigrateResult<()> {
        log(&self.events, format!("dump:{instance}"));
        Ok(())
    }
    async fn dump_live(&self, instance: &str, page_server: &str) -> MigrateResult<()> {
        log(&self.events, format!("dump_live:{instance}:{page_server}"));
        Ok(())
    }
    async fn stop(&self, instance: &str) -> MigrateResult<()> {
        log(&self.events, format!("stop:{instance}"));
        Ok(())
    }
    async fn restart(
        &self,
        user: &str,
        checkpoint: &str,
        _image_path: &str,
        instance: &str,
    ) -> MigrateResult<()> {
        log(&self.events, format!("restart:{user}:{checkpoint}:{instance}"));
        Ok(())
    }
    async fn configure_memory_mode(&self, _user: &str, checkpoint: &str) -> MigrateResult<()> {
        log(&self.events, format!("memory_mode:{checkpoint}"));
        Ok(())
    }
    async fn launch_page_server(
        &self,
        _user: &str,
        checkpoint: &str,
        _image_path: &str,
        instance: &str,
    ) -> MigrateResult<()> {
        log(&self.events, format!("page_server:{checkpoint}:{instance}"));
        Ok(())
    }
    async fn restore(&self, user: &str, instance: &str) -> MigrateResult<()> {
        log(&self.events, format!("restore:{user}:{instance}"));
        Ok(())
    }
}

struct FakeSync {
    events: EventLog,
}

#[async_trait]
impl DirectorySync for FakeSync {
    async fn sync(&self, _user: &str, dir: &Path, target: &str) -> MigrateResult<()> {
        log(&self.events, format!("sync:{}:{target}", dir.display()));
        Ok(())
    }
}

struct FakeBulk {
    events: EventLog,
}

#[async_trait]
impl BulkTransfer for FakeBulk {
    async fn push(&self, addr: &str, image_dir: &Path) -> MigrateResult<()> {
        log(&self.events, format!("push:{addr}:{}", image_dir.display()));
        Ok(())
    }
}

/// Build one "host": a full service with fakes at the leaf seams. The
/// coordinator half dials peers through a real gRPC connector on
/// `peer_port`; the agent half probes `page_server_port` for readiness.
fn build_service(
    events: &EventLog,
    fail_status: bool,
    shared_fs: bool,
    peer_port: u16,
    page_server_port: u16,
) -> MigrationService {
    let options = ServiceOptions {
        shared_fs,
        ..ServiceOptions::default()
    };
    let tool: Arc<dyn CheckpointTool> = Arc::new(FakeTool {
        events: Arc::clone(events),
    });
    let coordinator = MigrationCoordinator::new(
        Arc::new(FakeRegistry { fail_status }),
        Arc::clone(&tool),
        Arc::new(FakeSync {
            events: Arc::clone(events),
        }),
        Arc::new(GrpcConnector::new(peer_port, Duration::from_secs(5))),
        Arc::new(FakeBulk {
            events: Arc::clone(events),
        }),
        &options,
    );
    MigrationService::with_parts(coordinator, MigrationAgent::new(tool, page_server_port))
}

async fn start_service(service: MigrationService) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(MigrationServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

/// Bind a stand-in page server so readiness probes succeed.
async fn start_page_server() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });
    port
}

#[tokio::test]
async fn disk_migration_restarts_on_destination_exactly_once() {
    let source_events = events();
    let dest_events = events();

    // Destination first: the source's connector needs its port.
    let dest_addr = start_service(build_service(&dest_events, false, true, 0, 0)).await;
    let source_addr = start_service(build_service(
        &source_events,
        false,
        true,
        dest_addr.port(),
        0,
    ))
    .await;

    let mut client = MigrationClient::connect(format!("http://{source_addr}"))
        .await
        .unwrap();
    let response = client
        .migrate(pb::MigrateRequest {
            user: "alice".into(),
            instance: "web1".into(),
            target: "127.0.0.1".into(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status, pb::MigrationStatus::Ok as i32);
    assert_eq!(recorded(&dest_events, "restart:alice:ckpt-1:web1"), 1);
    // Shared filesystem: no replication anywhere.
    assert_eq!(recorded(&source_events, "sync:"), 0);
}

#[tokio::test]
async fn diskless_migration_restores_on_destination() {
    let source_events = events();
    let dest_events = events();

    let page_server_port = start_page_server().await;
    let dest_addr =
        start_service(build_service(&dest_events, false, true, 0, page_server_port)).await;
    let source_addr = start_service(build_service(
        &source_events,
        false,
        true,
        dest_addr.port(),
        0,
    ))
    .await;

    let mut client = MigrationClient::connect(format!("http://{source_addr}"))
        .await
        .unwrap();
    let response = client
        .diskless_migrate(pb::DisklessMigrateRequest {
            user: "alice".into(),
            instance: "web1".into(),
            target: "127.0.0.1".into(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status, pb::MigrationStatus::Ok as i32);
    // Destination prepared the page server, then finalized the restore.
    assert_eq!(recorded(&dest_events, "memory_mode:ckpt-1"), 1);
    assert_eq!(recorded(&dest_events, "page_server:ckpt-1:web1"), 1);
    assert_eq!(recorded(&dest_events, "restore:alice:web1"), 1);
    // Source streamed pages at the target and pushed the image dir.
    assert_eq!(recorded(&source_events, "dump_live:web1:127.0.0.1"), 1);
    assert_eq!(recorded(&source_events, "push:127.0.0.1:"), 1);
}

#[tokio::test]
async fn resolution_failure_reports_fail_not_transport_error() {
    let source_events = events();
    let source_addr = start_service(build_service(&source_events, true, true, 1, 0)).await;

    let mut client = MigrationClient::connect(format!("http://{source_addr}"))
        .await
        .unwrap();
    let response = client
        .migrate(pb::MigrateRequest {
            user: "alice".into(),
            instance: "ghost".into(),
            target: "127.0.0.1".into(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status, pb::MigrationStatus::Fail as i32);
}

#[tokio::test]
async fn unreachable_destination_reports_fail() {
    let source_events = events();
    // Reserve a port with no listener behind it.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = unused.local_addr().unwrap().port();
    drop(unused);

    let source_addr =
        start_service(build_service(&source_events, false, true, dead_port, 0)).await;

    let mut client = MigrationClient::connect(format!("http://{source_addr}"))
        .await
        .unwrap();
    let response = client
        .migrate(pb::MigrateRequest {
            user: "alice".into(),
            instance: "web1".into(),
            target: "127.0.0.1".into(),
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status, pb::MigrationStatus::Fail as i32);
    // The dial failed, so nothing was pushed and nothing restarted.
    assert_eq!(recorded(&source_events, "push:"), 0);
}
