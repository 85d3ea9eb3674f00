//! Checkpoint/restore based migration of container instances between hosts.
//!
//! Every participating host runs the same service (`podshiftd`). The host
//! that receives a migration request acts as **coordinator**: it drives the
//! migration state machine, invoking the local checkpoint tool and calling
//! the destination host, which acts as **agent** and restores the workload.
//! Two network endpoints are involved: a gRPC control port ([`rpc`]) and a
//! raw TCP port for bulk image transfer ([`transfer`]) used when the hosts
//! do not share a filesystem.
//!
//! The actual process-state capture is external (CRIU driven through the
//! container runtime CLI); this crate only orchestrates it. All external
//! capabilities (registry lookups, subprocess execution, directory
//! replication, the remote peer) sit behind traits so the state machines
//! are testable without a second host.

pub mod agent;
pub mod coordinator;
pub mod errors;
pub mod exec;
pub mod options;
pub mod registry;
pub mod rpc;
pub mod transfer;

pub use errors::{MigrateError, MigrateResult};
pub use options::ServiceOptions;
pub use rpc::MigrationService;
