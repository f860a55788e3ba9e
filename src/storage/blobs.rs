//! Content-addressed blob store for uploaded images.
//!
//! Bytes are streamed simultaneously into a temp file and a SHA-256
//! accumulator, so the payload is never buffered whole in memory. The final
//! name is derived from the digest, which makes identical uploads collapse
//! onto one file regardless of filename or upload time. Digest collision is
//! treated as content equality by design.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ApiError;

/// Known image signatures: PNG, JPEG, GIF, RIFF (WEBP), BMP.
const IMAGE_SIGNATURES: &[&[u8]] = &[
    &[0x89, 0x50, 0x4E, 0x47],
    &[0xFF, 0xD8, 0xFF],
    &[0x47, 0x49, 0x46, 0x38],
    &[0x52, 0x49, 0x46, 0x46],
    &[0x42, 0x4D],
];

/// A stored (or deduplicated) upload.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Public URL of the blob.
    pub url: String,
    /// Hex content digest.
    pub digest: String,
}

/// Content-addressed store rooted at one uploads directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    uploads_dir: PathBuf,
}

impl BlobStore {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Directory the blobs live in (served statically under `/uploads`).
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Create the uploads directory if missing.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.uploads_dir)
            .await
            .context("Failed to create uploads directory")
    }

    /// Stream an upload to disk under its digest-derived name.
    ///
    /// The stream feeds a digest task and a temp-file writer concurrently;
    /// both are joined before the digest-derived final path is decided. A
    /// byte-identical prior upload short-circuits to the existing blob; new
    /// content must carry a known image signature or is rejected.
    pub async fn store<S, E>(
        &self,
        mut stream: S,
        declared_filename: &str,
    ) -> Result<StoredBlob, ApiError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let ext = extension_of(declared_filename);
        let temp_path = self.uploads_dir.join(format!("tmp-{}{ext}", Uuid::new_v4()));

        let (hash_tx, mut hash_rx) = mpsc::channel::<Bytes>(16);
        let (file_tx, mut file_rx) = mpsc::channel::<Bytes>(16);

        let hash_task = tokio::spawn(async move {
            let mut hasher = Sha256::new();
            while let Some(chunk) = hash_rx.recv().await {
                hasher.update(&chunk);
            }
            hex_digest(&hasher.finalize())
        });

        let write_path = temp_path.clone();
        let write_task = tokio::spawn(async move {
            let mut file = fs::File::create(&write_path)
                .await
                .context("Failed to create temp upload file")?;
            while let Some(chunk) = file_rx.recv().await {
                file.write_all(&chunk)
                    .await
                    .context("Failed to write upload chunk")?;
            }
            file.flush().await.context("Failed to flush upload file")?;
            Ok::<_, anyhow::Error>(())
        });

        let mut stream_err: Option<anyhow::Error> = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    // A closed receiver means the writer already failed;
                    // the join below surfaces its error.
                    if hash_tx.send(bytes.clone()).await.is_err()
                        || file_tx.send(bytes).await.is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    stream_err = Some(anyhow::Error::new(e).context("Upload stream failed"));
                    break;
                }
            }
        }
        drop(hash_tx);
        drop(file_tx);

        let joined = tokio::try_join!(
            async { hash_task.await.context("Digest task panicked") },
            async { write_task.await.context("Write task panicked")? },
        );

        let digest = match (stream_err, joined) {
            (Some(e), _) | (None, Err(e)) => {
                self.discard_temp(&temp_path).await;
                return Err(ApiError::Internal(e));
            }
            (None, Ok((digest, ()))) => digest,
        };

        let final_name = format!("{digest}{ext}");
        let final_path = self.uploads_dir.join(&final_name);
        let url = format!("/uploads/{final_name}");

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            self.discard_temp(&temp_path).await;
            tracing::debug!(digest = %digest, "Duplicate upload detected; reusing stored blob");
            return Ok(StoredBlob { url, digest });
        }

        match has_image_signature(&temp_path).await {
            Ok(true) => {}
            Ok(false) => {
                self.discard_temp(&temp_path).await;
                return Err(ApiError::InvalidImage);
            }
            Err(e) => {
                self.discard_temp(&temp_path).await;
                return Err(ApiError::Internal(e));
            }
        }

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            self.discard_temp(&temp_path).await;
            return Err(ApiError::Internal(
                anyhow::Error::new(e).context("Failed to move upload into place"),
            ));
        }

        tracing::info!(digest = %digest, "Stored uploaded blob");
        Ok(StoredBlob { url, digest })
    }

    async fn discard_temp(&self, temp_path: &Path) {
        if let Err(e) = fs::remove_file(temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove temp upload");
            }
        }
    }
}

/// Lowercased extension of the declared filename, defaulting to `.png`.
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(|| ".png".to_string(), |ext| format!(".{}", ext.to_lowercase()))
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Check the file's first bytes against the known image signatures.
async fn has_image_signature(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)
        .await
        .context("Failed to open temp upload for validation")?;
    let mut head = [0u8; 4];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .await
            .context("Failed to read upload header")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(IMAGE_SIGNATURES.iter().any(|sig| head[..filled].starts_with(sig)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn byte_stream(
        chunks: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    fn png_payload() -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47];
        bytes.extend_from_slice(b"fake-png-body");
        bytes
    }

    async fn store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.ensure_dir().await.unwrap();
        (store, dir)
    }

    fn stored_files(dir: &TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_identical_uploads_deduplicate() {
        let (store, dir) = store().await;

        let first = store
            .store(byte_stream(vec![png_payload()]), "a.png")
            .await
            .unwrap();
        let second = store
            .store(byte_stream(vec![png_payload()]), "different-name.png")
            .await
            .unwrap();

        assert_eq!(first.url, second.url);
        assert_eq!(first.digest, second.digest);
        assert_eq!(stored_files(&dir).len(), 1);
    }

    #[tokio::test]
    async fn test_chunked_stream_hashes_whole_payload() {
        let (store, _dir) = store().await;
        let payload = png_payload();
        let (head, tail) = payload.split_at(6);

        let whole = store
            .store(byte_stream(vec![payload.clone()]), "a.png")
            .await
            .unwrap();
        let chunked = store
            .store(byte_stream(vec![head.to_vec(), tail.to_vec()]), "b.png")
            .await
            .unwrap();

        assert_eq!(whole.digest, chunked.digest);
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_and_cleaned() {
        let (store, dir) = store().await;

        let result = store
            .store(byte_stream(vec![b"plain text".to_vec()]), "a.png")
            .await;
        assert!(matches!(result, Err(ApiError::InvalidImage)));
        assert!(stored_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_extension_preserved_lowercase() {
        let (store, _dir) = store().await;
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x01];

        let blob = store.store(byte_stream(vec![jpeg]), "Photo.JPEG").await.unwrap();
        assert!(blob.url.ends_with(".jpeg"));
        assert!(blob.url.starts_with("/uploads/"));
    }

    #[tokio::test]
    async fn test_missing_extension_defaults_to_png() {
        assert_eq!(extension_of("pasted-image"), ".png");
        assert_eq!(extension_of("shot.webp"), ".webp");
    }

    #[tokio::test]
    async fn test_short_payload_rejected() {
        let (store, dir) = store().await;
        let result = store.store(byte_stream(vec![vec![0x42]]), "b.bmp").await;
        assert!(matches!(result, Err(ApiError::InvalidImage)));
        assert!(stored_files(&dir).is_empty());
    }
}
