//! Render service: cache lookup, miss path and bounded worker pool
//!
//! Every backend call (open, render) runs on tokio's blocking pool behind a
//! semaphore sized to the configured worker count, so request handlers never
//! rasterize on the async workers. Background renders (prefetch) first take a
//! permit from a smaller budget, half the workers and at least one, so a
//! foreground miss never queues behind more than that many of them.
//!
//! A miss is rendered in a detached task. The caller waits on it with a
//! timeout; if the caller times out or goes away, the render still finishes
//! and lands in the cache for the next request, unless its document was
//! purged in the meantime. Two concurrent misses for the same key may both
//! render; the second put overwrites the first with identical bytes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::cache::{CacheSource, PageCache, RenderKey, RenderedPage};
use crate::error::{DeliveryError, DeliveryResult};
use crate::pool::DocumentPool;

use super::types::ImageFormat;

/// Client-facing page request before tier normalization
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page: usize,
    pub width: u32,
    pub dpr: f32,
    pub rotation: i64,
    pub format: ImageFormat,
}

/// A page served by the service, with the tier that produced it
#[derive(Debug, Clone)]
pub struct Rendered {
    pub page: Arc<RenderedPage>,
    pub source: CacheSource,
}

#[derive(Debug, Default)]
struct RenderCounters {
    renders: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

pub struct RenderService {
    pool: Arc<DocumentPool>,
    cache: Arc<PageCache>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    background: Arc<Semaphore>,
    background_count: usize,
    timeout: Duration,
    counters: Arc<RenderCounters>,
}

impl RenderService {
    pub fn new(
        pool: Arc<DocumentPool>,
        cache: Arc<PageCache>,
        worker_count: usize,
        timeout: Duration,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let background_count = (worker_count / 2).max(1);
        Self {
            pool,
            cache,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            background: Arc::new(Semaphore::new(background_count)),
            background_count,
            timeout,
            counters: Arc::new(RenderCounters::default()),
        }
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<DocumentPool> {
        &self.pool
    }

    /// Normalized cache key for `request` against the file's current mtime
    pub async fn key_for(&self, path: &Path, request: &PageRequest) -> DeliveryResult<RenderKey> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeliveryError::NotFound(format!("{} is missing on disk", path.display()))
            } else {
                DeliveryError::Io(e)
            }
        })?;

        Ok(RenderKey::new(
            path,
            request.page,
            request.width,
            request.dpr,
            request.rotation,
            request.format,
            metadata.modified().ok(),
        ))
    }

    /// Serve `key` from cache, rendering on a miss
    ///
    /// Waits at most the configured timeout for a fresh render.
    pub async fn render(&self, key: RenderKey) -> DeliveryResult<Rendered> {
        if let Some((page, source)) = self.cache.get(&key).await {
            return Ok(Rendered { page, source });
        }

        let task = self.spawn_render(key, None);
        match timeout(self.timeout, task).await {
            Ok(joined) => Ok(Rendered {
                page: joined??,
                source: CacheSource::Miss,
            }),
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::RenderTimeout(self.timeout.as_secs()))
            }
        }
    }

    /// Make sure `key` is cached, without a deadline, on the background budget
    ///
    /// Returns the tier that already held it, or `Miss` if it was rendered.
    pub async fn ensure_cached(&self, key: RenderKey) -> DeliveryResult<CacheSource> {
        if self.cache.contains_in_memory(&key) {
            return Ok(CacheSource::Memory);
        }
        if let Some((_, source)) = self.cache.get(&key).await {
            return Ok(source);
        }

        let permit = Arc::clone(&self.background)
            .acquire_owned()
            .await
            .map_err(|_| DeliveryError::Internal("background render budget closed".to_string()))?;
        // Another job may have rendered it while we waited
        if self.cache.contains_in_memory(&key) {
            return Ok(CacheSource::Memory);
        }
        self.spawn_render(key, Some(permit)).await??;
        Ok(CacheSource::Miss)
    }

    /// Page count of the document at `path`, opening it through the pool
    pub async fn page_count(&self, path: &Path) -> DeliveryResult<usize> {
        let pool = Arc::clone(&self.pool);
        let workers = Arc::clone(&self.workers);
        let path = path.to_path_buf();

        let task = tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| DeliveryError::Internal("render worker pool closed".to_string()))?;
            tokio::task::spawn_blocking(move || pool.acquire(&path).map(|h| h.page_count)).await?
        });

        match timeout(self.timeout, task).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(DeliveryError::RenderTimeout(self.timeout.as_secs())),
        }
    }

    fn spawn_render(
        &self,
        key: RenderKey,
        background: Option<OwnedSemaphorePermit>,
    ) -> JoinHandle<DeliveryResult<Arc<RenderedPage>>> {
        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        let workers = Arc::clone(&self.workers);
        let counters = Arc::clone(&self.counters);
        let generation = self.cache.generation(key.path());

        tokio::spawn(async move {
            let _background = background;
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| DeliveryError::Internal("render worker pool closed".to_string()))?;

            let path = Arc::clone(&key.path);
            let params = key.params();
            let result = tokio::task::spawn_blocking(move || {
                let handle = pool.acquire(&path)?;
                if params.page >= handle.page_count {
                    return Err(DeliveryError::PageNotFound {
                        page: params.page,
                        page_count: handle.page_count,
                    });
                }
                handle.document().render(&params)
            })
            .await?;

            let data = match result {
                Ok(data) => data,
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        path = %key.path().display(),
                        page = key.page,
                        error = %e,
                        "Render failed"
                    );
                    return Err(e);
                }
            };

            counters.renders.fetch_add(1, Ordering::Relaxed);
            let page = Arc::new(RenderedPage::new(key, data));
            cache.put_if_current(Arc::clone(&page), generation).await;
            Ok(page)
        })
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            workers: self.worker_count,
            busy_workers: self.worker_count - self.workers.available_permits(),
            background_workers: self.background_count,
            background_busy: self.background_count - self.background.available_permits(),
            renders: self.counters.renders.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Render worker statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    pub workers: usize,
    pub busy_workers: usize,
    /// Budget for prefetch renders
    pub background_workers: usize,
    pub background_busy: usize,
    pub renders: u64,
    pub failures: u64,
    pub timeouts: u64,
}
