//! Document handle pool
//!
//! Keeps a bounded set of open documents so that consecutive page renders of
//! the same file do not pay the open cost again.
//!
//! # Design
//!
//! ```text
//! acquire(path) ──► [lock] expire idle ─► hit? bump last_access ─► handle
//!                     │ miss
//!                     ▼
//!                 [unlocked] backend.open(path)
//!                     │
//!                     ▼
//!                 [lock] evict LRU if full ─► insert ─► handle
//! ```
//!
//! The lock is never held across a backend call, including the close that
//! runs when an evicted entry is dropped: evicted entries are collected under
//! the lock and dropped after it is released. Handles are `Arc`-shared, so the
//! document is closed once the last in-flight render releases its clone.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::DeliveryResult;
use crate::render::{OpenDocument, RenderBackend};

/// An open document checked out of the pool
#[derive(Clone)]
pub struct DocumentHandle {
    pub path: PathBuf,
    pub opened_at: Instant,
    pub last_access: Instant,
    pub page_count: usize,
    document: Arc<dyn OpenDocument>,
}

impl DocumentHandle {
    pub fn document(&self) -> &Arc<dyn OpenDocument> {
        &self.document
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("path", &self.path)
            .field("page_count", &self.page_count)
            .finish()
    }
}

struct PoolEntry {
    handle: DocumentHandle,
    /// File mtime observed when the handle was opened
    modified: Option<SystemTime>,
}

/// Bounded pool of open documents with LRU + idle-TTL eviction
pub struct DocumentPool {
    backend: Arc<dyn RenderBackend>,
    entries: Mutex<LruCache<PathBuf, PoolEntry>>,
    capacity: usize,
    idle_ttl: Duration,
    opened: AtomicU64,
    evicted: AtomicU64,
}

impl DocumentPool {
    pub fn new(backend: Arc<dyn RenderBackend>, capacity: usize, idle_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            // Unbounded map; capacity is enforced explicitly so eviction
            // happens before the new document is inserted.
            entries: Mutex::new(LruCache::unbounded()),
            capacity,
            idle_ttl,
            opened: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Get an open handle for `path`, opening the document if needed
    ///
    /// Blocking: may call into the rendering backend. Run on a worker thread.
    pub fn acquire(&self, path: &Path) -> DeliveryResult<DocumentHandle> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let mut evicted = Vec::new();

        {
            let mut entries = self.entries.lock();
            evicted.extend(self.expire_locked(&mut entries, Instant::now()));

            let stale = match entries.get_mut(path) {
                Some(entry) if entry.modified == modified => {
                    entry.handle.last_access = Instant::now();
                    return Ok(entry.handle.clone());
                }
                Some(_) => true,
                None => false,
            };
            if stale {
                evicted.extend(entries.pop(path));
                self.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(path = %path.display(), "Document changed on disk, reopening");
            }
        }
        drop(evicted);

        // Failed opens propagate and leave nothing cached
        let document = self.backend.open(path)?;
        let now = Instant::now();
        let handle = DocumentHandle {
            path: path.to_path_buf(),
            opened_at: now,
            last_access: now,
            page_count: document.page_count(),
            document,
        };

        let mut evicted = Vec::new();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get_mut(path) {
            // Another caller opened it while we were unlocked; keep theirs
            if existing.modified == modified {
                existing.handle.last_access = now;
                let existing = existing.handle.clone();
                drop(entries);
                return Ok(existing);
            }
            evicted.extend(entries.pop(path));
        }

        while entries.len() >= self.capacity {
            match entries.pop_lru() {
                Some((evicted_path, entry)) => {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(path = %evicted_path.display(), "Evicted least recently used document");
                    evicted.push(entry);
                }
                None => break,
            }
        }

        entries.put(
            path.to_path_buf(),
            PoolEntry {
                handle: handle.clone(),
                modified,
            },
        );
        self.opened.fetch_add(1, Ordering::Relaxed);
        drop(entries);
        drop(evicted);

        Ok(handle)
    }

    /// Close every handle idle for longer than the TTL
    pub fn evict_expired(&self) -> usize {
        let expired = {
            let mut entries = self.entries.lock();
            self.expire_locked(&mut entries, Instant::now())
        };
        expired.len()
    }

    /// Detach idle entries; the caller drops them once the lock is released
    fn expire_locked(&self, entries: &mut LruCache<PathBuf, PoolEntry>, now: Instant) -> Vec<PoolEntry> {
        let expired: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.handle.last_access) > self.idle_ttl)
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for path in &expired {
            removed.extend(entries.pop(path));
            tracing::debug!(path = %path.display(), "Closed idle document handle");
        }
        self.evicted.fetch_add(removed.len() as u64, Ordering::Relaxed);

        removed
    }

    /// Drop the handle for `path`, if open
    pub fn close(&self, path: &Path) -> bool {
        let removed = self.entries.lock().pop(path);
        removed.is_some()
    }

    /// Whether `path` currently has an open handle
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.len(),
            capacity: self.capacity,
            opened: self.opened.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Currently open handles
    pub open: usize,
    pub capacity: usize,
    /// Documents opened since start
    pub opened: u64,
    /// Handles closed by LRU, TTL or staleness
    pub evicted: u64,
}
