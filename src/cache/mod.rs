//! Two-tier page render cache
//!
//! ```text
//! get(key) ──► memory LRU ──hit──► page
//!                 │ miss
//!                 ▼
//!              disk dir ──hit──► promote to memory ──► page
//!                 │ miss
//!                 ▼
//!               None   (caller renders, then put() writes both tiers)
//! ```
//!
//! The cache never renders on its own. Disk failures are logged and treated
//! as misses so a broken cache directory degrades to re-rendering.
//!
//! Purging a document bumps its generation. A render that started before the
//! purge stores through [`PageCache::put_if_current`] and is discarded instead
//! of resurrecting entries for a document that is gone.

mod disk;
mod key;
mod memory;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

pub use disk::DiskCache;
pub use key::{
    document_digest, normalize_rotation, snap_dpr, snap_width, RenderKey, DPR_TIERS, WIDTH_TIERS,
};
pub use memory::MemoryCache;

/// Immutable encoded page image
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub key: RenderKey,
    pub data: Bytes,
}

impl RenderedPage {
    pub fn new(key: RenderKey, data: impl Into<Bytes>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Which tier answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Disk,
    Miss,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Memory => "memory",
            CacheSource::Disk => "disk",
            CacheSource::Miss => "miss",
        }
    }
}

/// Memory tier in front of a disk tier
pub struct PageCache {
    memory: MemoryCache,
    disk: DiskCache,
    /// Purge count per document path
    generations: Mutex<HashMap<PathBuf, u64>>,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new(memory_entries: usize, disk_dir: PathBuf, disk_ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(memory_entries),
            disk: DiskCache::new(disk_dir, disk_ttl),
            generations: Mutex::new(HashMap::new()),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key` in memory, then on disk
    pub async fn get(&self, key: &RenderKey) -> Option<(Arc<RenderedPage>, CacheSource)> {
        if let Some(page) = self.memory.get(key) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some((page, CacheSource::Memory));
        }

        match self.disk.get(key).await {
            Ok(Some(data)) => {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                let page = Arc::new(RenderedPage::new(key.clone(), data));
                self.memory.put(Arc::clone(&page));
                Some((page, CacheSource::Disk))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, page = key.page, "Disk cache read failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Memory-tier presence check, without touching counters or LRU order
    pub fn contains_in_memory(&self, key: &RenderKey) -> bool {
        self.memory.contains(key)
    }

    /// Store a page in both tiers
    pub async fn put(&self, page: Arc<RenderedPage>) {
        self.memory.put(Arc::clone(&page));
        if let Err(e) = self.disk.put(&page.key, &page.data).await {
            tracing::warn!(error = %e, page = page.key.page, "Disk cache write failed");
        }
    }

    /// Current purge generation of the document at `path`
    pub fn generation(&self, path: &Path) -> u64 {
        self.generations.lock().get(path).copied().unwrap_or(0)
    }

    /// Store a page unless its document was purged since `generation` was read
    ///
    /// Returns whether the page was kept.
    pub async fn put_if_current(&self, page: Arc<RenderedPage>, generation: u64) -> bool {
        let path = page.key.path().to_path_buf();
        if self.generation(&path) != generation {
            tracing::debug!(path = %path.display(), page = page.key.page, "Discarded render of purged document");
            return false;
        }

        self.put(page).await;

        // A purge that ran during the write may have missed it
        if self.generation(&path) != generation {
            self.remove_document(&path).await;
            return false;
        }
        true
    }

    /// Drop every cached render of one document
    pub async fn purge_document(&self, path: &Path) -> usize {
        *self.generations.lock().entry(path.to_path_buf()).or_insert(0) += 1;
        self.remove_document(path).await
    }

    async fn remove_document(&self, path: &Path) -> usize {
        let removed = self.memory.remove_document(path);
        if let Err(e) = self.disk.remove_document(path).await {
            tracing::warn!(error = %e, path = %path.display(), "Failed to purge disk cache");
        }
        removed
    }

    /// Drop the memory tier and delete the disk directory
    pub async fn clear(&self) {
        self.memory.clear();
        if let Err(e) = self.disk.clear().await {
            tracing::warn!(error = %e, "Failed to clear disk cache");
        }
    }

    /// Delete expired disk entries
    pub async fn prune_disk(&self) -> usize {
        match self.disk.prune_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Disk cache prune failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.disk_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = memory_hits + disk_hits + misses;

        CacheStats {
            memory_entries: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            memory_hits,
            disk_hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (memory_hits + disk_hits) as f64 / lookups as f64
            },
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    /// Hits over lookups, 0.0 when nothing was looked up yet
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ImageFormat;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    fn key(page: usize, modified: Option<SystemTime>) -> RenderKey {
        RenderKey::new("/docs/a.pdf", page, 1080, 1.0, 0, ImageFormat::Png, modified)
    }

    #[tokio::test]
    async fn test_memory_then_disk() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(1, dir.path().to_path_buf(), Duration::from_secs(3600));
        let first = key(0, None);
        let second = key(1, None);

        assert!(cache.get(&first).await.is_none());
        cache.put(Arc::new(RenderedPage::new(first.clone(), b"p0".to_vec()))).await;
        cache.put(Arc::new(RenderedPage::new(second.clone(), b"p1".to_vec()))).await;

        // Capacity 1: first was pushed out of memory but survives on disk
        let (page, source) = cache.get(&first).await.unwrap();
        assert_eq!(source, CacheSource::Disk);
        assert_eq!(&page.data[..], b"p0");

        // Disk hit promoted it back into memory
        let (_, source) = cache.get(&first).await.unwrap();
        assert_eq!(source, CacheSource::Memory);

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_new_mtime_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(8, dir.path().to_path_buf(), Duration::from_secs(3600));
        let t0 = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let old = key(0, Some(t0));
        cache.put(Arc::new(RenderedPage::new(old.clone(), b"old".to_vec()))).await;

        let new = key(0, Some(t0 + Duration::from_secs(1)));
        assert!(cache.get(&new).await.is_none());
        assert!(cache.get(&old).await.is_some());
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("pages");
        let cache = PageCache::new(8, root.clone(), Duration::from_secs(3600));
        cache.put(Arc::new(RenderedPage::new(key(0, None), b"a".to_vec()))).await;
        cache.put(Arc::new(RenderedPage::new(key(1, None), b"b".to_vec()))).await;

        assert_eq!(cache.purge_document(Path::new("/docs/a.pdf")).await, 2);
        assert!(cache.get(&key(0, None)).await.is_none());

        cache.put(Arc::new(RenderedPage::new(key(2, None), b"c".to_vec()))).await;
        cache.clear().await;
        assert_eq!(cache.stats().memory_entries, 0);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_render_started_before_purge_is_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = PageCache::new(8, dir.path().join("pages"), Duration::from_secs(3600));
        let path = Path::new("/docs/a.pdf");

        let before = cache.generation(path);
        cache.purge_document(path).await;
        assert_ne!(cache.generation(path), before);

        let stale = Arc::new(RenderedPage::new(key(0, None), b"late".to_vec()));
        assert!(!cache.put_if_current(stale, before).await);
        assert!(cache.get(&key(0, None)).await.is_none());
        assert!(!cache.disk.entry_path(&key(0, None)).exists());

        let fresh = Arc::new(RenderedPage::new(key(0, None), b"new".to_vec()));
        assert!(cache.put_if_current(fresh, cache.generation(path)).await);
        assert!(cache.contains_in_memory(&key(0, None)));
    }
}
