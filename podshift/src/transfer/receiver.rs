//! Receiving side of the bulk channel.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::MAX_PATH_LEN;
use crate::errors::{MigrateError, MigrateResult};

/// Receiver behavior knobs, derived from service configuration.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Treat received files as gzip tarballs and unpack them into the
    /// destination path's parent directory, removing the tarball after.
    pub unpack_archives: bool,
    /// When set, destination paths outside this root are rejected.
    pub transfer_root: Option<PathBuf>,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            unpack_archives: true,
            transfer_root: None,
        }
    }
}

/// Accept loop for the bulk transfer port. One task per connection;
/// connections share nothing, and a malformed envelope only fails its own
/// connection.
pub struct TransferListener {
    listener: TcpListener,
    options: ReceiverOptions,
}

impl TransferListener {
    pub async fn bind(addr: SocketAddr, options: ReceiverOptions) -> MigrateResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MigrateError::Transfer(format!("failed to bind {addr}: {e}")))?;
        Ok(Self { listener, options })
    }

    /// Address actually bound (port 0 resolves at bind time).
    pub fn local_addr(&self) -> MigrateResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MigrateError::Transfer(e.to_string()))
    }

    pub async fn run(self) -> MigrateResult<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "transfer accept failed");
                    continue;
                }
            };
            tracing::debug!(%peer, "transfer connection accepted");
            let options = self.options.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &options).await {
                    tracing::warn!(%peer, error = %e, "transfer connection failed");
                }
            });
        }
    }
}

/// Receive one envelope: length-prefixed destination path, then the file
/// body until the peer closes.
async fn handle_connection(mut stream: TcpStream, options: &ReceiverOptions) -> MigrateResult<()> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to read path length: {e}")))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_PATH_LEN {
        return Err(MigrateError::Transfer(format!(
            "declared path length {len} out of range"
        )));
    }

    let mut path_buf = vec![0u8; len];
    stream
        .read_exact(&mut path_buf)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to read path: {e}")))?;
    let path = String::from_utf8(path_buf)
        .map_err(|e| MigrateError::Transfer(format!("destination path is not utf-8: {e}")))?;
    let dest = validate_dest_path(Path::new(&path), options.transfer_root.as_deref())?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MigrateError::Transfer(format!("failed to create {}: {e}", parent.display())))?;
    }
    let mut file = tokio::fs::File::create(&dest)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to create {}: {e}", dest.display())))?;
    let bytes = tokio::io::copy(&mut stream, &mut file)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to write {}: {e}", dest.display())))?;
    file.flush()
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to flush {}: {e}", dest.display())))?;
    tracing::info!(path = %dest.display(), bytes, "received file");

    if options.unpack_archives {
        unpack_archive(&dest).await?;
        tokio::fs::remove_file(&dest)
            .await
            .map_err(|e| MigrateError::Transfer(format!("failed to remove tarball: {e}")))?;
        tracing::info!(path = %dest.display(), "unpacked archive");
    }
    Ok(())
}

/// The destination path comes verbatim from the peer, so it is checked
/// before any filesystem access: absolute, no parent-dir components, and
/// inside the confinement root when one is configured.
pub fn validate_dest_path(path: &Path, root: Option<&Path>) -> MigrateResult<PathBuf> {
    if !path.is_absolute() {
        return Err(MigrateError::Transfer(format!(
            "destination path must be absolute: {}",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(MigrateError::Transfer(format!(
            "destination path must not contain ..: {}",
            path.display()
        )));
    }
    if let Some(root) = root {
        if !path.starts_with(root) {
            return Err(MigrateError::Transfer(format!(
                "destination path {} escapes transfer root {}",
                path.display(),
                root.display()
            )));
        }
    }
    Ok(path.to_path_buf())
}

/// Unpack a gzip tarball into its parent directory.
async fn unpack_archive(archive: &Path) -> MigrateResult<()> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let parent = archive
            .parent()
            .ok_or_else(|| MigrateError::Transfer("archive path has no parent".into()))?;
        let file = std::fs::File::open(&archive)
            .map_err(|e| MigrateError::Transfer(format!("failed to open archive: {e}")))?;
        tar::Archive::new(GzDecoder::new(file))
            .unpack(parent)
            .map_err(|e| {
                MigrateError::Transfer(format!("failed to unpack {}: {e}", archive.display()))
            })
    })
    .await
    .map_err(|e| MigrateError::Transfer(format!("unpack task panicked: {e}")))?
}
