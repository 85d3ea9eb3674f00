//! gRPC control plane: generated protocol types, the migration service,
//! and the server bootstrap.

mod server;
mod service;

pub use server::serve;
pub use service::MigrationService;

/// Generated protocol types for `migration.v1`.
pub mod pb {
    tonic::include_proto!("migration.v1");
}
