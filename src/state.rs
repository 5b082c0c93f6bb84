//! Application state management

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::PageCache;
use crate::config::Config;
use crate::pool::DocumentPool;
use crate::prefetch::{PrefetchHandle, PrefetchScheduler};
use crate::registry::DocumentRegistry;
use crate::render::{RenderBackend, RenderService};
use crate::session::SessionManager;
use crate::stats::ServerStats;
use crate::strategy::StrategySelector;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    registry: DocumentRegistry,
    renderer: Arc<RenderService>,
    selector: StrategySelector,
    sessions: SessionManager,
    prefetch: PrefetchHandle,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    stats: ServerStats,
}

impl AppState {
    /// Build the engine and start the prefetch scheduler
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, backend: Arc<dyn RenderBackend>) -> Self {
        let pool = Arc::new(DocumentPool::new(
            backend,
            config.pool.capacity,
            config.pool.idle_ttl,
        ));
        let cache = Arc::new(PageCache::new(
            config.cache.memory_entries,
            config.cache.disk_dir.clone(),
            config.cache.disk_ttl,
        ));
        let renderer = Arc::new(RenderService::new(
            pool,
            cache,
            config.render.workers,
            config.render.timeout,
        ));
        let sessions = SessionManager::new(config.session.ttl);
        let (prefetch, scheduler) = PrefetchScheduler::new(
            Arc::clone(&renderer),
            sessions.clone(),
            config.prefetch.sweep_interval,
        );
        let scheduler = scheduler.spawn();

        tracing::info!(
            pool_capacity = config.pool.capacity,
            memory_entries = config.cache.memory_entries,
            disk_cache = %config.cache.disk_dir.display(),
            workers = config.render.workers,
            "Delivery engine initialized"
        );

        Self {
            inner: Arc::new(AppStateInner {
                registry: DocumentRegistry::new(
                    config.storage.upload_dir.clone(),
                    config.storage.storage_root.clone(),
                ),
                selector: StrategySelector::from(&config.delivery),
                config,
                renderer,
                sessions,
                prefetch,
                scheduler: Mutex::new(Some(scheduler)),
                stats: ServerStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.inner.registry
    }

    /// Get the render service (pool + cache + workers)
    pub fn renderer(&self) -> &RenderService {
        &self.inner.renderer
    }

    pub fn pool(&self) -> &DocumentPool {
        self.inner.renderer.pool()
    }

    pub fn cache(&self) -> &PageCache {
        self.inner.renderer.cache()
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.inner.selector
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn prefetch(&self) -> &PrefetchHandle {
        &self.inner.prefetch
    }

    pub fn stats(&self) -> &ServerStats {
        &self.inner.stats
    }

    /// Stop the background scheduler
    pub fn shutdown(&self) {
        tracing::info!("Shutting down delivery engine...");
        if let Some(task) = self.inner.scheduler.lock().take() {
            task.abort();
        }
    }
}
