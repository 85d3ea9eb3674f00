//! Error types shared across the migration service.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Failure kinds of a migration attempt.
///
/// Fatal steps abort the remaining state machine and map to a FAIL response;
/// non-fatal steps (the initial dump, the asynchronous stop) log and
/// continue. The RPC caller only ever sees OK/FAIL; these kinds exist for
/// the logs on either host.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Checkpoint registry lookup failed (missing instance, ghost record,
    /// unreadable record, no checkpoint taken yet).
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// RPC dial or call error against the peer.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer answered, but reported a non-OK status.
    #[error("remote peer reported failure: {0}")]
    Remote(String),

    /// External checkpoint/restore tool invocation failed.
    #[error("tool invocation failed: {0}")]
    Tool(String),

    /// Bulk transfer channel I/O error.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// A bounded RPC or tool invocation did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Invalid service configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tonic::transport::Error> for MigrateError {
    fn from(err: tonic::transport::Error) -> Self {
        MigrateError::Transport(err.to_string())
    }
}

impl From<tonic::Status> for MigrateError {
    fn from(status: tonic::Status) -> Self {
        MigrateError::Transport(format!("rpc call failed: {status}"))
    }
}
