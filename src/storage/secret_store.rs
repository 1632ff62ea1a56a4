// src/storage/secret_store.rs
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{self, StorageConfig};
use crate::error::{AgentError, Result};

/// One file of a batch transfer: `local` is relative to the local directory,
/// `remote` to the remote prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub local: String,
    pub remote: String,
}

impl FileMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// Same name on both sides.
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local: name.clone(),
            remote: name,
        }
    }
}

/// Join a remote prefix and an object name with exactly one separator.
pub fn remote_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Object key for `path`, taken verbatim.
fn object_path(path: &str) -> Result<ObjectPath> {
    ObjectPath::parse(path).map_err(|source| AgentError::InvalidPath {
        path: path.to_string(),
        source,
    })
}

/// Handle over one bucket of the configured provider.
///
/// Every upload refuses to replace an existing object unless the `_force`
/// variant is used. Every remote call gives up on timeout or cancellation.
#[derive(Debug, Clone)]
pub struct SecretStore {
    inner: Arc<dyn ObjectStore>,
    container: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl SecretStore {
    pub async fn connect(config: &StorageConfig, cancel: CancellationToken) -> Result<Self> {
        let inner = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            inner = backend::connect(config) => inner?,
        };
        info!(container = %config.container_name(), "connected to secret store");
        Ok(Self {
            inner,
            container: config.container_name(),
            timeout: config.timeout(),
            cancel,
        })
    }

    /// In-memory store, used by tests and dry runs.
    pub fn memory() -> Self {
        Self::from_store(
            Arc::new(object_store::memory::InMemory::new()),
            CancellationToken::new(),
        )
    }

    fn from_store(inner: Arc<dyn ObjectStore>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            container: "memory".to_string(),
            timeout: StorageConfig::memory().timeout(),
            cancel,
        }
    }

    pub fn close(self) {
        debug!(container = %self.container, "closing secret store");
    }

    async fn timed<T, F>(&self, operation: &str, path: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(operation, path, "storage call cancelled");
                Err(AgentError::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    operation: format!("{} {}", operation, path),
                    after: self.timeout,
                }),
            },
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let location = object_path(path)?;
        self.timed("head", path, async {
            match self.inner.head(&location).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(AgentError::from(e)),
            }
        })
        .await
    }

    async fn put(&self, path: &str, data: Bytes, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists(path).await? {
            warn!(path, "refusing to overwrite existing object");
            return Err(AgentError::AlreadyExists(path.to_string()));
        }
        let location = object_path(path)?;
        let size = data.len();
        self.timed("put", path, async {
            self.inner.put(&location, data.into()).await?;
            Ok::<_, AgentError>(())
        })
        .await?;
        info!(path, size, "uploaded object");
        Ok(())
    }

    /// Upload everything `reader` yields to `path`, failing with
    /// `AlreadyExists` when the path is taken.
    pub async fn upload<R>(&self, path: &str, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        self.put(path, Bytes::from(buf), false).await
    }

    pub async fn upload_force<R>(&self, path: &str, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        self.put(path, Bytes::from(buf), true).await
    }

    pub async fn upload_bytes(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        self.put(path, data.into(), false).await
    }

    pub async fn upload_bytes_force(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        self.put(path, data.into(), true).await
    }

    pub async fn upload_file(&self, path: &str, local: &Path) -> Result<()> {
        debug!(local = %local.display(), path, "uploading file");
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| AgentError::local_file(local, e))?;
        self.put(path, Bytes::from(data), false).await
    }

    pub async fn upload_file_force(&self, path: &str, local: &Path) -> Result<()> {
        debug!(local = %local.display(), path, "uploading file");
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| AgentError::local_file(local, e))?;
        self.put(path, Bytes::from(data), true).await
    }

    /// Stream the object at `path` into `writer`. Returns the number of
    /// bytes copied; only succeeds once the copy is complete and flushed.
    pub async fn download<W>(&self, path: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let location = object_path(path)?;
        let copied = self
            .timed("get", path, async {
                let result = self.inner.get(&location).await?;
                let mut stream = result.into_stream();
                let mut copied = 0u64;
                while let Some(chunk) = stream.try_next().await? {
                    writer.write_all(&chunk).await?;
                    copied += chunk.len() as u64;
                }
                writer.flush().await?;
                Ok::<_, AgentError>(copied)
            })
            .await?;
        debug!(path, size = copied, "downloaded object");
        Ok(copied)
    }

    pub async fn download_bytes(&self, path: &str) -> Result<Bytes> {
        let location = object_path(path)?;
        let data = self
            .timed("get", path, async {
                let result = self.inner.get(&location).await?;
                Ok::<_, AgentError>(result.bytes().await?)
            })
            .await?;
        debug!(path, size = data.len(), "downloaded object");
        Ok(data)
    }

    /// Download each mapping from `remote_prefix` into `local_dir`.
    ///
    /// With `overwrite == false` an existing local file aborts the whole
    /// batch before the bucket is touched. A missing remote object aborts
    /// the batch; files already written stay in place.
    pub async fn download_files_to_directory(
        &self,
        files: &[FileMapping],
        local_dir: &Path,
        remote_prefix: &str,
        overwrite: bool,
    ) -> Result<()> {
        create_local_dir(local_dir).await?;

        if !overwrite {
            for mapping in files {
                let target = local_dir.join(&mapping.local);
                let exists = tokio::fs::try_exists(&target)
                    .await
                    .map_err(|e| AgentError::local_file(&target, e))?;
                if exists {
                    return Err(AgentError::LocalFileExists(target));
                }
            }
        }

        for mapping in files {
            let target = local_dir.join(&mapping.local);
            let remote = remote_path(remote_prefix, &mapping.remote);
            info!(remote = %remote, local = %target.display(), "downloading");

            let data = self.download_bytes(&remote).await.map_err(|e| {
                warn!(remote = %remote, error = %e, "aborting batch download");
                e
            })?;

            // the previous file goes only once the new bytes are in memory
            if overwrite {
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => debug!(local = %target.display(), "removed previous file"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(AgentError::local_file(&target, e)),
                }
            }
            write_local_file(&target, &data).await?;
        }
        Ok(())
    }

    /// Fetch the named objects under `remote_prefix` into memory, keyed by name.
    pub async fn download_files_to_memory(
        &self,
        names: &[&str],
        remote_prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for name in names {
            let data = self
                .download_bytes(&remote_path(remote_prefix, name))
                .await?;
            out.insert(name.to_string(), data.to_vec());
        }
        Ok(out)
    }

    async fn upload_directory(
        &self,
        files: &[FileMapping],
        local_dir: &Path,
        remote_prefix: &str,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite {
            for mapping in files {
                let remote = remote_path(remote_prefix, &mapping.remote);
                if self.exists(&remote).await? {
                    return Err(AgentError::AlreadyExists(remote));
                }
            }
        }
        for mapping in files {
            let local = local_dir.join(&mapping.local);
            let remote = remote_path(remote_prefix, &mapping.remote);
            info!(local = %local.display(), remote = %remote, "trying to upload");
            if overwrite {
                self.upload_file_force(&remote, &local).await?;
            } else {
                self.upload_file(&remote, &local).await?;
            }
        }
        Ok(())
    }

    pub async fn upload_files_from_directory(
        &self,
        files: &[FileMapping],
        local_dir: &Path,
        remote_prefix: &str,
    ) -> Result<()> {
        self.upload_directory(files, local_dir, remote_prefix, false)
            .await
    }

    pub async fn upload_files_from_directory_force(
        &self,
        files: &[FileMapping],
        local_dir: &Path,
        remote_prefix: &str,
    ) -> Result<()> {
        self.upload_directory(files, local_dir, remote_prefix, true)
            .await
    }

    async fn upload_memory(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        remote_prefix: &str,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite {
            for name in files.keys() {
                let remote = remote_path(remote_prefix, name);
                if self.exists(&remote).await? {
                    return Err(AgentError::AlreadyExists(remote));
                }
            }
        }
        for (name, data) in files {
            let remote = remote_path(remote_prefix, name);
            self.put(&remote, Bytes::from(data.clone()), overwrite)
                .await?;
        }
        Ok(())
    }

    pub async fn upload_files_from_memory(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        remote_prefix: &str,
    ) -> Result<()> {
        self.upload_memory(files, remote_prefix, false).await
    }

    pub async fn upload_files_from_memory_force(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        remote_prefix: &str,
    ) -> Result<()> {
        self.upload_memory(files, remote_prefix, true).await
    }

    /// Every object key below `prefix`, recursively, sorted. Keys come back
    /// exactly as stored and can be passed to the other calls unchanged.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let location = object_path(prefix)?;
        let metas = self
            .timed("list", prefix, async {
                Ok::<_, AgentError>(self
                    .inner
                    .list(Some(&location))
                    .try_collect::<Vec<_>>()
                    .await?)
            })
            .await?;
        let mut paths: Vec<String> = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Delete the object at `path`; `NotFound` when it is absent.
    pub async fn remove(&self, path: &str) -> Result<()> {
        if !self.exists(path).await? {
            return Err(AgentError::NotFound(path.to_string()));
        }
        let location = object_path(path)?;
        self.timed("delete", path, async {
            self.inner.delete(&location).await?;
            Ok::<_, AgentError>(())
        })
        .await?;
        info!(path, "removed object");
        Ok(())
    }

    async fn relocate(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        if !self.exists(from).await? {
            return Err(AgentError::NotFound(from.to_string()));
        }
        if !overwrite && self.exists(to).await? {
            return Err(AgentError::AlreadyExists(to.to_string()));
        }
        let source = object_path(from)?;
        let destination = object_path(to)?;
        self.timed("rename", from, async {
            self.inner.rename(&source, &destination).await?;
            Ok::<_, AgentError>(())
        })
        .await?;
        info!(from, to, "moved object");
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.relocate(from, to, false).await
    }

    /// Move `name` from one prefix to another, refusing to replace an
    /// object already at the destination.
    pub async fn move_to(&self, name: &str, from_prefix: &str, to_prefix: &str) -> Result<()> {
        self.relocate(
            &remote_path(from_prefix, name),
            &remote_path(to_prefix, name),
            false,
        )
        .await
    }

    pub async fn move_to_force(&self, name: &str, from_prefix: &str, to_prefix: &str) -> Result<()> {
        self.relocate(
            &remote_path(from_prefix, name),
            &remote_path(to_prefix, name),
            true,
        )
        .await
    }
}

async fn create_local_dir(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o750);
    builder
        .create(dir)
        .await
        .map_err(|e| AgentError::local_file(dir, e))
}

async fn write_local_file(target: &Path, data: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(if is_private_key(target) { 0o600 } else { 0o644 });

    let mut file = options
        .open(target)
        .await
        .map_err(|e| AgentError::local_file(target, e))?;
    file.write_all(data)
        .await
        .map_err(|e| AgentError::local_file(target, e))?;
    file.flush()
        .await
        .map_err(|e| AgentError::local_file(target, e))?;
    Ok(())
}

fn is_private_key(path: &Path) -> bool {
    path.extension().map(|ext| ext == "key").unwrap_or(false)
}
