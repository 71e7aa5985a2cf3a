use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{generate_key, validate_key, BlobError, BlobRef, BlobStore};

/// Blob store backed by a local directory.
///
/// Objects are published with a hard link, which fails on an existing
/// path, so two writers can never land on the same file.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Writes to a hidden partial file, then links it into place.
    ///
    /// The object appears under its key only once fully written, and the
    /// link fails if the key is already taken. The partial file is removed
    /// on every path, including cancellation.
    async fn write_exclusive(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        let io_err = |source| BlobError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let partial = PartialFile::beside(&path);
        // Synchronous, so the file never appears after its guard is gone.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial.path)
            .map_err(io_err)?;
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        drop(file);

        match tokio::fs::hard_link(&partial.path, &path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(BlobError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(io_err(e)),
        }
    }
}

/// A not yet published object, deleted when dropped.
struct PartialFile {
    path: PathBuf,
}

impl PartialFile {
    fn beside(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: target.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4())),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not remove partial blob {}: {}", self.path.display(), e);
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(blob.key())?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(blob.key().to_string()))
            }
            Err(e) => Err(BlobError::Io {
                key: blob.key().to_string(),
                source: e,
            }),
        }
    }

    async fn store(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<BlobRef, BlobError> {
        let key = generate_key(namespace, name);
        self.write_exclusive(&key, &bytes).await?;
        log::debug!("Stored {} bytes at blob '{}'", bytes.len(), key);
        Ok(BlobRef::new(key))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<(), BlobError> {
        let path = self.path_for(blob.key())?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(blob.key().to_string()))
            }
            Err(e) => Err(BlobError::Io {
                key: blob.key().to_string(),
                source: e,
            }),
        }
    }
}
