//! Sending side of the bulk channel.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::IMAGE_ARCHIVE_NAME;
use crate::errors::{MigrateError, MigrateResult};

/// Pushes a checkpoint image directory to a peer's transfer endpoint.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    async fn push(&self, addr: &str, image_dir: &Path) -> MigrateResult<()>;
}

/// Production pusher: package the directory, send the archive, one TCP
/// connection per file.
pub struct BulkSender;

#[async_trait]
impl BulkTransfer for BulkSender {
    async fn push(&self, addr: &str, image_dir: &Path) -> MigrateResult<()> {
        let dir = image_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || pack_image_dir(&dir))
            .await
            .map_err(|e| MigrateError::Transfer(format!("archive task panicked: {e}")))??;
        tracing::info!(archive = %archive.display(), "packaged image directory");
        send_file(addr, &archive).await
    }
}

/// Build `img.tar.gz` inside `image_dir` from the directory's top-level
/// entries. A stale archive from an earlier attempt is excluded from the
/// new one.
pub fn pack_image_dir(image_dir: &Path) -> MigrateResult<PathBuf> {
    let archive_path = image_dir.join(IMAGE_ARCHIVE_NAME);
    let file = std::fs::File::create(&archive_path)
        .map_err(|e| MigrateError::Transfer(format!("failed to create archive: {e}")))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let entries = std::fs::read_dir(image_dir)
        .map_err(|e| MigrateError::Transfer(format!("failed to read {}: {e}", image_dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| MigrateError::Transfer(e.to_string()))?;
        let name = entry.file_name();
        if name == IMAGE_ARCHIVE_NAME {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            builder.append_dir_all(Path::new(&name), &path)
        } else {
            builder.append_path_with_name(&path, Path::new(&name))
        };
        result.map_err(|e| {
            MigrateError::Transfer(format!("failed to archive {}: {e}", path.display()))
        })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| MigrateError::Transfer(format!("failed to finish archive: {e}")))?;
    encoder
        .finish()
        .map_err(|e| MigrateError::Transfer(format!("failed to finish archive: {e}")))?;
    Ok(archive_path)
}

/// Send one file as one envelope on a fresh connection, then close it.
pub async fn send_file(addr: &str, path: &Path) -> MigrateResult<()> {
    let dest = path
        .to_str()
        .ok_or_else(|| MigrateError::Transfer(format!("non-utf8 path {}", path.display())))?;
    let len = u32::try_from(dest.len())
        .map_err(|_| MigrateError::Transfer(format!("path too long: {dest}")))?;

    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to connect to {addr}: {e}")))?;

    stream
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to send path length: {e}")))?;
    stream
        .write_all(dest.as_bytes())
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to send path: {e}")))?;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to open {}: {e}", path.display())))?;
    let bytes = tokio::io::copy(&mut file, &mut stream)
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to stream {}: {e}", path.display())))?;
    stream
        .shutdown()
        .await
        .map_err(|e| MigrateError::Transfer(format!("failed to close connection: {e}")))?;

    tracing::info!(path = %path.display(), bytes, peer = addr, "sent file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn sender_emits_length_prefixed_envelope() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("payload.bin");
        tokio::fs::write(&src, b"payload bytes").await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let mut path_buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            stream.read_exact(&mut path_buf).await.unwrap();
            let mut body = Vec::new();
            stream.read_to_end(&mut body).await.unwrap();
            (String::from_utf8(path_buf).unwrap(), body)
        });

        send_file(&addr.to_string(), &src).await.unwrap();

        let (path, body) = server.await.unwrap();
        assert_eq!(path, src.to_str().unwrap());
        assert_eq!(body, b"payload bytes");
    }

    #[test]
    fn packs_top_level_entries_and_excludes_itself() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("pages.img"), b"pages").unwrap();
        std::fs::create_dir(tmp.path().join("meta")).unwrap();
        std::fs::write(tmp.path().join("meta/inventory.img"), b"inv").unwrap();
        // Stale archive from a previous attempt must not be re-archived.
        std::fs::write(tmp.path().join(IMAGE_ARCHIVE_NAME), b"stale").unwrap();

        let archive = pack_image_dir(tmp.path()).unwrap();

        let out = tempfile::tempdir().unwrap();
        let file = std::fs::File::open(&archive).unwrap();
        tar::Archive::new(GzDecoder::new(file)).unpack(out.path()).unwrap();

        assert_eq!(std::fs::read(out.path().join("pages.img")).unwrap(), b"pages");
        assert_eq!(
            std::fs::read(out.path().join("meta/inventory.img")).unwrap(),
            b"inv"
        );
        assert!(!out.path().join(IMAGE_ARCHIVE_NAME).exists());
    }
}
