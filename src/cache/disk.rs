//! Persistent on-disk tier
//!
//! One file per render key:
//!
//! ```text
//! <dir>/<document digest>/<key digest>.<ext>
//! ```
//!
//! Freshness is judged by file mtime against the configured TTL. Writes go to
//! a uniquely named temp file and are renamed into place, so concurrent
//! writers of the same key race harmlessly (last rename wins, same bytes).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use uuid::Uuid;

use super::key::{document_digest, RenderKey};

pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DiskCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_dir(&self, path: &Path) -> PathBuf {
        self.dir.join(document_digest(path))
    }

    /// File holding the render for `key`
    pub fn entry_path(&self, key: &RenderKey) -> PathBuf {
        self.document_dir(key.path())
            .join(format!("{}.{}", key.digest(), key.format.extension()))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }

    /// Read a fresh entry; expired entries are deleted and reported as a miss
    pub async fn get(&self, key: &RenderKey) -> std::io::Result<Option<Bytes>> {
        let path = self.entry_path(key);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if self.is_expired(metadata.modified()?) {
            tracing::debug!(path = %path.display(), "Disk cache entry expired");
            remove_file_if_exists(&path).await?;
            return Ok(None);
        }

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write (or overwrite) the entry for `key`
    pub async fn put(&self, key: &RenderKey, data: &[u8]) -> std::io::Result<()> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(())
    }

    /// Delete every entry rendered from `path`
    pub async fn remove_document(&self, path: &Path) -> std::io::Result<()> {
        remove_dir_if_exists(&self.document_dir(path)).await
    }

    /// Delete the whole cache directory
    pub async fn clear(&self) -> std::io::Result<()> {
        remove_dir_if_exists(&self.dir).await
    }

    /// Delete expired entries and empty document directories
    pub async fn prune_expired(&self) -> std::io::Result<usize> {
        let mut removed = 0;

        let mut documents = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        while let Some(document) = documents.next_entry().await? {
            if !document.file_type().await?.is_dir() {
                continue;
            }

            let mut remaining = 0;
            let mut files = tokio::fs::read_dir(document.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let metadata = match file.metadata().await {
                    Ok(metadata) => metadata,
                    // Renamed or removed by a concurrent writer
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                };
                if metadata.is_file() && self.is_expired(metadata.modified()?) {
                    remove_file_if_exists(&file.path()).await?;
                    removed += 1;
                } else {
                    remaining += 1;
                }
            }

            if remaining == 0 {
                let _ = tokio::fs::remove_dir(document.path()).await;
            }
        }

        Ok(removed)
    }
}

async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ImageFormat;
    use tempfile::TempDir;

    fn key(path: &str, page: usize) -> RenderKey {
        RenderKey::new(path, page, 1080, 1.0, 0, ImageFormat::Png, None)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600));
        let k = key("/docs/a.pdf", 0);

        assert!(cache.get(&k).await.unwrap().is_none());
        cache.put(&k, b"rendered").await.unwrap();

        let data = cache.get(&k).await.unwrap().unwrap();
        assert_eq!(&data[..], b"rendered");
        assert!(cache.entry_path(&k).starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let k = key("/docs/a.pdf", 0);
        cache.put(&k, b"old").await.unwrap();

        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(cache.entry_path(&k))
            .unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();

        assert!(cache.get(&k).await.unwrap().is_none());
        assert!(!cache.entry_path(&k).exists());
    }

    #[tokio::test]
    async fn test_remove_document_only_touches_that_document() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600));
        let a = key("/docs/a.pdf", 0);
        let b = key("/docs/b.pdf", 0);
        cache.put(&a, b"a").await.unwrap();
        cache.put(&b, b"b").await.unwrap();

        cache.remove_document(Path::new("/docs/a.pdf")).await.unwrap();

        assert!(cache.get(&a).await.unwrap().is_none());
        assert!(cache.get(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let stale = key("/docs/a.pdf", 0);
        let fresh = key("/docs/b.pdf", 0);
        cache.put(&stale, b"stale").await.unwrap();
        cache.put(&fresh, b"fresh").await.unwrap();

        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(cache.entry_path(&stale))
            .unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();
        drop(file);

        assert_eq!(cache.prune_expired().await.unwrap(), 1);
        assert!(!cache.entry_path(&stale).parent().unwrap().exists());
        assert!(cache.entry_path(&fresh).exists());
    }

    #[tokio::test]
    async fn test_clear_removes_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let cache = DiskCache::new(root.clone(), Duration::from_secs(3600));
        cache.put(&key("/docs/a.pdf", 0), b"a").await.unwrap();

        cache.clear().await.unwrap();
        assert!(!root.exists());
        cache.clear().await.unwrap();
    }
}
