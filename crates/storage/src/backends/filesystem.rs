//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// File name prefix of in-progress writes. Never listed, never a valid key.
const TEMP_PREFIX: &str = ".partial-";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Runs the checks on the blocking pool since they canonicalize and stat.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn not_found_or_io(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

/// Map a key to a path under `root`, refusing anything that could escape it.
///
/// Keys must consist of normal components only, and neither the target nor
/// its nearest existing ancestor may resolve (through symlinks) outside the
/// root.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(format!("malformed key: {key:?}")));
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) if !part.to_string_lossy().starts_with(TEMP_PREFIX) => {}
            _ => {
                return Err(StorageError::InvalidKey(format!(
                    "unsafe path component in key: {key:?}"
                )));
            }
        }
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    // The target itself, if it exists (a dangling symlink counts).
    match std::fs::symlink_metadata(&path) {
        Ok(meta) => {
            let canonical = path.canonicalize().map_err(|e| {
                if meta.file_type().is_symlink() {
                    StorageError::InvalidKey(format!("dangling symlink: {key:?}"))
                } else {
                    StorageError::Io(e)
                }
            })?;
            if !canonical.starts_with(&root_canonical) {
                return Err(StorageError::InvalidKey(format!(
                    "resolved path escapes storage root: {key:?}"
                )));
            }
            return Ok(path);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(StorageError::Io(err)),
    }

    // Otherwise the nearest existing ancestor, so directories are never
    // created through a symlink that leaves the root.
    let mut ancestor = path.as_path();
    while let Some(parent) = ancestor.parent() {
        match std::fs::symlink_metadata(parent) {
            Ok(_) => {
                let parent_canonical = parent.canonicalize().map_err(|_| {
                    StorageError::InvalidKey(format!("dangling ancestor symlink: {key:?}"))
                })?;
                if !parent_canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "ancestor path escapes storage root: {key:?}"
                    )));
                }
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ancestor = parent,
            Err(err) => return Err(StorageError::Io(err)),
        }
    }

    Ok(path)
}

/// Sibling temp path for an in-progress write to `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!("{TEMP_PREFIX}{}", Uuid::new_v4()))
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found_or_io(key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(not_found_or_io(key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        // Opening up front surfaces NotFound here instead of mid-stream. On
        // unix an open handle keeps reading even if the sweeper unlinks the file.
        let file = fs::File::open(&path).await.map_err(not_found_or_io(key))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut upload = self.put_stream(key).await?;
        if let Err(e) = upload.write(data).await {
            let _ = upload.abort().await;
            return Err(e);
        }
        upload.finish().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            key: key.to_string(),
            file: Some(file),
            temp_path: Some(temp_path),
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(not_found_or_io(key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base_path = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix.trim_end_matches('/')).await?
        };
        let mut results = Vec::new();

        match fs::try_exists(&base_path).await {
            Ok(false) => return Ok(results),
            Ok(true) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; links are skipped.
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    results.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        results.sort_unstable();
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn remove_stale_partials(
        &self,
        cutoff: OffsetDateTime,
    ) -> StorageResult<Vec<ObjectMeta>> {
        let mut removed = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if !file_type.is_file()
                    || !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StorageError::Io(e)),
                };
                let Some(modified) = metadata.modified().ok().map(OffsetDateTime::from) else {
                    continue;
                };
                if modified >= cutoff {
                    continue;
                }
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed.push(ObjectMeta {
                        size: metadata.len(),
                        last_modified: Some(modified),
                    }),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for the filesystem backend.
///
/// Data goes to a hidden sibling temp file that is renamed into place on
/// `finish`. If the upload is dropped unfinished (for example because the
/// request future was cancelled) the temp file is removed.
struct FilesystemUpload {
    key: String,
    file: Option<fs::File>,
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::UploadClosed(self.key.clone()))?;
        file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let file = self
            .file
            .take()
            .ok_or_else(|| StorageError::UploadClosed(self.key.clone()))?;
        // Flush to disk before the rename publishes the object.
        file.sync_all().await?;
        drop(file);

        if let Some(temp_path) = self.temp_path.as_ref() {
            fs::rename(temp_path, &self.final_path).await?;
        }
        self.temp_path = None;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        if let Some(temp_path) = self.temp_path.take() {
            match fs::remove_file(&temp_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }
}

impl Drop for FilesystemUpload {
    fn drop(&mut self) {
        if let Some(temp_path) = self.temp_path.take() {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&temp_path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(
                    key = %self.key,
                    path = %temp_path.display(),
                    error = %e,
                    "Failed to remove abandoned upload"
                );
            }
        }
    }
}
