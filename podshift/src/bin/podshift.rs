//! Thin client: ask the local daemon to migrate an instance to a target
//! host.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use podshift::options::DEFAULT_CONTROL_PORT;
use podshift::rpc::pb;
use podshift::rpc::pb::migration_client::MigrationClient;

#[derive(Debug, Parser)]
#[command(name = "podshift", about = "migrate a running instance to another host")]
struct Args {
    /// Instance to migrate.
    instance: String,

    /// Destination host (name or IP).
    target: String,

    /// Live migration: stream memory pages directly to the destination.
    #[arg(long, short = 'd')]
    diskless: bool,

    /// Control port of the local daemon.
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let user = nix::unistd::User::from_uid(nix::unistd::Uid::effective())
        .context("failed to look up current user")?
        .context("current user not found")?
        .name;
    tracing::info!(user, instance = %args.instance, target = %args.target, "requesting migration");

    let mut client = MigrationClient::connect(format!("http://127.0.0.1:{}", args.port))
        .await
        .context("failed to reach the local daemon")?;

    let status = if args.diskless {
        client
            .diskless_migrate(pb::DisklessMigrateRequest {
                user,
                instance: args.instance.clone(),
                target: args.target.clone(),
            })
            .await?
            .into_inner()
            .status
    } else {
        client
            .migrate(pb::MigrateRequest {
                user,
                instance: args.instance.clone(),
                target: args.target.clone(),
            })
            .await?
            .into_inner()
            .status
    };

    if status != pb::MigrationStatus::Ok as i32 {
        anyhow::bail!("migration failed; consult the daemon logs on both hosts");
    }
    tracing::info!(instance = %args.instance, target = %args.target, "migration complete");
    Ok(())
}
