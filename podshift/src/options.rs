//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default control-plane (RPC) port.
pub const DEFAULT_CONTROL_PORT: u16 = 7946;

/// Default bulk transfer port.
pub const DEFAULT_TRANSFER_PORT: u16 = 7947;

/// Default port the destination-side page server listens on.
pub const DEFAULT_PAGE_SERVER_PORT: u16 = 7948;

/// Static configuration for one migration service process.
///
/// Whether the two hosts share a filesystem is deployment knowledge, so it
/// lives here as required configuration rather than as a per-request toggle.
/// Both migration paths branch on the same flag: replication and bulk
/// transfer only happen when the filesystem is NOT shared.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Source and destination see the same path namespace for
    /// checkpoint/image data.
    pub shared_fs: bool,
    /// Port the RPC service listens on; also the port dialed on the peer.
    pub control_port: u16,
    /// Port the bulk transfer listener binds; also the port pushed to.
    pub transfer_port: u16,
    /// Local port probed to decide the page server is accepting connections.
    pub page_server_port: u16,
    /// Upper bound on any single outbound RPC, including the remote tool
    /// work it triggers. Must comfortably exceed `tool_timeout`.
    pub rpc_timeout: Duration,
    /// Upper bound on any single external tool invocation.
    pub tool_timeout: Duration,
    /// Unpack received files as gzip tarballs into their parent directory.
    pub unpack_archives: bool,
    /// When set, bulk transfer writes are confined under this directory.
    pub transfer_root: Option<PathBuf>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            shared_fs: true,
            control_port: DEFAULT_CONTROL_PORT,
            transfer_port: DEFAULT_TRANSFER_PORT,
            page_server_port: DEFAULT_PAGE_SERVER_PORT,
            rpc_timeout: Duration::from_secs(900),
            tool_timeout: Duration::from_secs(600),
            unpack_archives: true,
            transfer_root: None,
        }
    }
}
