//! Migration service daemon: serves the control-plane RPC surface and the
//! bulk transfer listener side by side.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use podshift::options::{DEFAULT_CONTROL_PORT, DEFAULT_PAGE_SERVER_PORT, DEFAULT_TRANSFER_PORT};
use podshift::transfer::{ReceiverOptions, TransferListener};
use podshift::{MigrationService, ServiceOptions, rpc};

#[derive(Debug, Parser)]
#[command(name = "podshiftd", about = "checkpoint/restore migration daemon")]
struct Args {
    /// Control-plane (RPC) port; also the port dialed on peers.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Bulk transfer port.
    #[arg(long, default_value_t = DEFAULT_TRANSFER_PORT)]
    transfer_port: u16,

    /// Local port probed for page-server readiness.
    #[arg(long, default_value_t = DEFAULT_PAGE_SERVER_PORT)]
    page_server_port: u16,

    /// Source and destination do NOT share a filesystem: replicate
    /// checkpoint data and push images over the bulk channel.
    #[arg(long)]
    no_shared_fs: bool,

    /// Keep received files as-is instead of unpacking them as tarballs.
    #[arg(long)]
    no_unpack: bool,

    /// Confine bulk transfer writes to this directory.
    #[arg(long)]
    transfer_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = ServiceOptions {
        shared_fs: !args.no_shared_fs,
        control_port: args.control_port,
        transfer_port: args.transfer_port,
        page_server_port: args.page_server_port,
        unpack_archives: !args.no_unpack,
        transfer_root: args.transfer_root,
        ..ServiceOptions::default()
    };

    let control_addr: SocketAddr = ([0, 0, 0, 0], options.control_port).into();
    let transfer_addr: SocketAddr = ([0, 0, 0, 0], options.transfer_port).into();

    let listener = TransferListener::bind(
        transfer_addr,
        ReceiverOptions {
            unpack_archives: options.unpack_archives,
            transfer_root: options.transfer_root.clone(),
        },
    )
    .await
    .context("failed to start transfer listener")?;
    tracing::info!(%transfer_addr, "transfer listener started");

    let service = MigrationService::new(&options);
    tracing::info!(
        %control_addr,
        shared_fs = options.shared_fs,
        "podshiftd starting"
    );

    tokio::try_join!(rpc::serve(service, control_addr), listener.run())?;
    Ok(())
}
