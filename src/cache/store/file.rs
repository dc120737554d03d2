use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use super::{apply_ttl, CacheStore};
use crate::cache::CachedResponse;
use crate::error::{Error, Result};

/// A file-backed cache: one `postcard`-encoded file per entry
///
/// Entries live at `{directory}/{sha256(key)}.cache`. Writes stage into a
/// temporary file in the same directory and atomically rename into place, so
/// concurrent readers always see a consistent snapshot and the last writer
/// wins. Entries that fail to decode, and expired entries, are unlinked on
/// read.
#[cfg_attr(docsrs, doc(cfg(feature = "store-file")))]
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
    default_ttl: Option<Duration>,
    max_bytes: Option<u64>,
}

impl FileStore {
    /// Creates the store, creating `directory` (mode `0755`) if needed
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &directory,
                std::fs::Permissions::from_mode(0o755),
            )?;
        }
        Ok(Self { directory, default_ttl: None, max_bytes: None })
    }

    /// Sets the TTL applied when `set` receives no explicit TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Caps the total size of the cache directory; exceeding the cap
    /// triggers a prune before the next write
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// The directory entries are stored under
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}.cache", hex::encode(Sha256::digest(key))))
    }

    async fn directory_size(&self) -> Result<u64> {
        let mut total = 0;
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }

    async fn remove_if_present(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<CachedResponse> {
    postcard::from_bytes(bytes)
        .map_err(|err| Error::CacheBackend { reason: err.to_string() })
}

fn encode(entry: &CachedResponse) -> Result<Vec<u8>> {
    postcard::to_allocvec(entry)
        .map_err(|err| Error::CacheBackend { reason: err.to_string() })
}

fn expired(entry: &CachedResponse, now: SystemTime) -> bool {
    entry.expires_at.is_some_and(|expires_at| now > expires_at)
}

#[async_trait::async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        let entry = match decode(&bytes) {
            Ok(entry) => entry,
            Err(_) => {
                log::debug!("removing undecodable cache file {}", path.display());
                Self::remove_if_present(&path).await?;
                return Ok(None);
            }
        };
        if expired(&entry, SystemTime::now()) {
            Self::remove_if_present(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(
        &self,
        key: &str,
        mut response: CachedResponse,
        ttl: Option<i64>,
    ) -> Result<()> {
        apply_ttl(&mut response, ttl, self.default_ttl);
        let bytes = encode(&response)?;
        if let Some(max_bytes) = self.max_bytes {
            if self.directory_size().await? + bytes.len() as u64 > max_bytes {
                self.prune().await?;
            }
        }
        let path = self.path_for(key);
        let directory = self.directory.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut staged = tempfile::NamedTempFile::new_in(&directory)?;
            staged.write_all(&bytes)?;
            staged.persist(&path).map_err(|err| Error::CacheBackend {
                reason: err.to_string(),
            })?;
            Ok(())
        })
        .await
        .map_err(|err| Error::CacheBackend { reason: err.to_string() })?
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Self::remove_if_present(&self.path_for(key)).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "cache") {
                Self::remove_if_present(&entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn prune(&self) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "cache") {
                continue;
            }
            let stale = match tokio::fs::read(&path).await {
                Ok(bytes) => match decode(&bytes) {
                    Ok(entry) => expired(&entry, now),
                    Err(_) => true,
                },
                Err(_) => continue,
            };
            if stale && Self::remove_if_present(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
