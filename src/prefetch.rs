//! Prefetch scheduler and housekeeping sweep
//!
//! A single background task owns the receiving end of a bounded channel.
//! Handlers submit prefetch requests with `try_send` and return immediately.
//! The task takes one request at a time and warms its pages on the render
//! service's background budget, so a burst of requests backs up in the
//! channel and the overflow is dropped rather than piling renders in front of
//! foreground misses. The same task ticks the housekeeping sweep (idle pool
//! handles, expired sessions, expired disk-cache files).
//!
//! Prefetch failures are logged and never reach the client that triggered
//! them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::CacheSource;
use crate::render::{ImageFormat, PageRequest, RenderService};
use crate::session::SessionManager;

/// Pending requests before new submissions are dropped
const QUEUE_CAPACITY: usize = 64;

/// Warm the cache around `current_page` of one document
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub document_id: String,
    pub path: PathBuf,
    pub current_page: usize,
    pub range: usize,
    pub width: u32,
    pub dpr: f32,
    pub rotation: i64,
    pub format: ImageFormat,
}

impl PrefetchRequest {
    fn page_request(&self, page: usize) -> PageRequest {
        PageRequest {
            page,
            width: self.width,
            dpr: self.dpr,
            rotation: self.rotation,
            format: self.format,
        }
    }
}

/// Pages within `range` of `current`, excluding `current`, clipped to the document
pub fn prefetch_window(current: usize, range: usize, page_count: usize) -> Vec<usize> {
    let first = current.saturating_sub(range);
    let last = current.saturating_add(range).min(page_count.saturating_sub(1));
    if page_count == 0 || first > last {
        return Vec::new();
    }
    (first..=last).filter(|page| *page != current).collect()
}

#[derive(Debug, Default)]
struct PrefetchCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    warmed: AtomicU64,
    already_cached: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable submit side of the scheduler
#[derive(Clone)]
pub struct PrefetchHandle {
    tx: mpsc::Sender<PrefetchRequest>,
    counters: Arc<PrefetchCounters>,
}

impl PrefetchHandle {
    /// Queue a request without waiting; returns false if the queue is full or closed
    pub fn submit(&self, request: PrefetchRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Prefetch request dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            warmed: self.counters.warmed.load(Ordering::Relaxed),
            already_cached: self.counters.already_cached.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Prefetch statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchStats {
    pub submitted: u64,
    pub dropped: u64,
    /// Pages rendered by prefetch
    pub warmed: u64,
    /// Pages that were already cached when their job ran
    pub already_cached: u64,
    pub failed: u64,
}

pub struct PrefetchScheduler {
    service: Arc<RenderService>,
    sessions: SessionManager,
    sweep_interval: Duration,
    counters: Arc<PrefetchCounters>,
    rx: mpsc::Receiver<PrefetchRequest>,
}

impl PrefetchScheduler {
    pub fn new(
        service: Arc<RenderService>,
        sessions: SessionManager,
        sweep_interval: Duration,
    ) -> (PrefetchHandle, Self) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let counters = Arc::new(PrefetchCounters::default());
        let handle = PrefetchHandle {
            tx,
            counters: Arc::clone(&counters),
        };
        let scheduler = Self {
            service,
            sessions,
            sweep_interval,
            counters,
            rx,
        };
        (handle, scheduler)
    }

    /// Run the scheduler loop until every `PrefetchHandle` is dropped
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let Self {
            service,
            sessions,
            sweep_interval,
            counters,
            mut rx,
        } = self;

        let mut sweep = tokio::time::interval(sweep_interval.max(Duration::from_secs(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        sweep.tick().await;

        let jobs = async {
            // Requests wait in the channel while a job runs
            while let Some(request) = rx.recv().await {
                run_job(Arc::clone(&service), Arc::clone(&counters), request).await;
            }
        };
        let housekeeping = async {
            loop {
                sweep.tick().await;
                sweep_once(&service, &sessions).await;
            }
        };

        tokio::select! {
            _ = jobs => {}
            _ = housekeeping => {}
        }

        tracing::debug!("Prefetch scheduler stopped");
    }
}

async fn run_job(service: Arc<RenderService>, counters: Arc<PrefetchCounters>, request: PrefetchRequest) {
    let page_count = match service.page_count(&request.path).await {
        Ok(count) => count,
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(doc_id = %request.document_id, error = %e, "Prefetch could not open document");
            return;
        }
    };

    // The current page is warmed too; it is usually already cached
    let mut pages = Vec::new();
    if request.current_page < page_count {
        pages.push(request.current_page);
    }
    pages.extend(prefetch_window(request.current_page, request.range, page_count));

    tracing::debug!(
        doc_id = %request.document_id,
        current_page = request.current_page,
        pages = ?pages,
        "Prefetching pages"
    );

    let jobs = pages.into_iter().map(|page| {
        let service = Arc::clone(&service);
        let counters = Arc::clone(&counters);
        let page_request = request.page_request(page);
        let document_id = request.document_id.clone();
        let path = request.path.clone();
        async move {
            let result = match service.key_for(&path, &page_request).await {
                Ok(key) => service.ensure_cached(key).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(CacheSource::Miss) => {
                    counters.warmed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {
                    counters.already_cached.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(doc_id = %document_id, page = page, error = %e, "Prefetch render failed");
                }
            }
        }
    });

    join_all(jobs).await;
}

/// One housekeeping pass
pub async fn sweep_once(service: &RenderService, sessions: &SessionManager) {
    let handles = service.pool().evict_expired();
    let expired_sessions = sessions.cleanup_expired().await;
    let disk_entries = service.cache().prune_disk().await;

    if handles + expired_sessions + disk_entries > 0 {
        tracing::debug!(
            handles = handles,
            sessions = expired_sessions,
            disk_entries = disk_entries,
            "Housekeeping sweep"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageCache;
    use crate::pool::DocumentPool;
    use crate::render::testing::{wait_until, Counters, FakeBackend};
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_window_excludes_current_page() {
        assert_eq!(prefetch_window(5, 2, 10), vec![3, 4, 6, 7]);
    }

    #[test]
    fn test_window_is_clipped() {
        assert_eq!(prefetch_window(0, 2, 10), vec![1, 2]);
        assert_eq!(prefetch_window(9, 2, 10), vec![7, 8]);
        assert_eq!(prefetch_window(0, 3, 1), Vec::<usize>::new());
        assert_eq!(prefetch_window(0, 3, 0), Vec::<usize>::new());
        assert_eq!(prefetch_window(4, 0, 10), Vec::<usize>::new());
    }

    struct Fixture {
        _dir: TempDir,
        doc: PathBuf,
        service: Arc<RenderService>,
        counters: Arc<Counters>,
        handle: PrefetchHandle,
    }

    fn fixture(backend: FakeBackend) -> Fixture {
        fixture_with(backend, 2, Duration::from_secs(10))
    }

    fn fixture_with(backend: FakeBackend, workers: usize, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("big.pdf");
        std::fs::write(&doc, b"%PDF-1.7 large").unwrap();
        let counters = Arc::clone(&backend.counters);
        let pool = Arc::new(DocumentPool::new(Arc::new(backend), 4, Duration::from_secs(300)));
        let cache = Arc::new(PageCache::new(64, dir.path().join("cache"), Duration::from_secs(3600)));
        let service = Arc::new(RenderService::new(pool, cache, workers, timeout));
        let sessions = SessionManager::new(Duration::from_secs(60));
        let (handle, scheduler) =
            PrefetchScheduler::new(Arc::clone(&service), sessions, Duration::from_secs(3600));
        scheduler.spawn();
        Fixture {
            doc,
            service,
            counters,
            handle,
            _dir: dir,
        }
    }

    fn request(f: &Fixture, current_page: usize, range: usize) -> PrefetchRequest {
        PrefetchRequest {
            document_id: "big".to_string(),
            path: f.doc.clone(),
            current_page,
            range,
            width: 1200,
            dpr: 1.0,
            rotation: 0,
            format: ImageFormat::Png,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_prefetch_populates_window_without_blocking() {
        let f = fixture(FakeBackend::new(20).with_delay(Duration::from_millis(100)));

        let started = Instant::now();
        assert!(f.handle.submit(request(&f, 5, 2)));
        assert!(started.elapsed() < Duration::from_millis(50));

        let mut keys = Vec::new();
        for page in 3..=7 {
            let page_request = request(&f, 5, 2).page_request(page);
            keys.push(f.service.key_for(&f.doc, &page_request).await.unwrap());
        }

        let cache = Arc::clone(f.service.cache());
        let all_cached = wait_until(Duration::from_secs(5), || {
            keys.iter().all(|key| cache.contains_in_memory(key))
        })
        .await;
        assert!(all_cached);
        assert_eq!(f.counters.renders(), 5);
    }

    #[tokio::test]
    async fn test_resubmitting_cached_window_is_a_near_noop() {
        let f = fixture(FakeBackend::new(20));

        f.handle.submit(request(&f, 5, 1));
        let handle = f.handle.clone();
        assert!(wait_until(Duration::from_secs(5), || handle.stats().warmed == 3).await);

        f.handle.submit(request(&f, 5, 1));
        assert!(wait_until(Duration::from_secs(5), || handle.stats().already_cached == 3).await);
        assert_eq!(f.counters.renders(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_surfaced() {
        let f = fixture(FakeBackend::new(10).with_failing_page(4));

        assert!(f.handle.submit(request(&f, 5, 1)));
        let handle = f.handle.clone();
        assert!(wait_until(Duration::from_secs(5), || {
            let stats = handle.stats();
            stats.failed == 1 && stats.warmed == 2
        })
        .await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_flood_is_shed_and_foreground_still_renders() {
        let f = fixture_with(
            FakeBackend::new(5000).with_delay(Duration::from_millis(20)),
            2,
            Duration::from_secs(2),
        );

        let accepted = (0..200)
            .filter(|i| f.handle.submit(request(&f, i * 20, 10)))
            .count();
        let stats = f.handle.stats();
        assert!(stats.dropped > 0);
        assert_eq!(stats.submitted as usize, accepted);
        assert!(accepted <= QUEUE_CAPACITY + 2);

        let page_request = request(&f, 4999, 0).page_request(4999);
        let key = f.service.key_for(&f.doc, &page_request).await.unwrap();
        let started = Instant::now();
        let rendered = f.service.render(key).await.unwrap();

        assert_eq!(rendered.source, CacheSource::Miss);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(f.service.stats().background_busy <= 1);
    }

    #[tokio::test]
    async fn test_sweep_closes_idle_handles() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("a.pdf");
        std::fs::write(&doc, b"%PDF-1.7").unwrap();
        let pool = Arc::new(DocumentPool::new(
            Arc::new(FakeBackend::new(1)),
            4,
            Duration::from_millis(10),
        ));
        let cache = Arc::new(PageCache::new(4, dir.path().join("cache"), Duration::from_secs(60)));
        let service = RenderService::new(Arc::clone(&pool), cache, 1, Duration::from_secs(5));

        service.page_count(&doc).await.unwrap();
        assert!(pool.contains(&doc));

        tokio::time::sleep(Duration::from_millis(30)).await;
        sweep_once(&service, &SessionManager::new(Duration::from_secs(60))).await;
        assert!(!pool.contains(&doc));
    }
}
