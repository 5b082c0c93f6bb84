//! In-process LRU tier

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::key::RenderKey;
use super::RenderedPage;

/// Bounded LRU of rendered pages, evicting by entry count
pub struct MemoryCache {
    entries: Mutex<LruCache<RenderKey, Arc<RenderedPage>>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a page, promoting it in LRU order
    pub fn get(&self, key: &RenderKey) -> Option<Arc<RenderedPage>> {
        self.entries.lock().get(key).cloned()
    }

    /// Check presence without promoting
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.entries.lock().contains(key)
    }

    /// Insert or overwrite the entry for the page's key
    pub fn put(&self, page: Arc<RenderedPage>) {
        self.entries.lock().put(page.key.clone(), page);
    }

    /// Remove every entry rendered from `path`
    pub fn remove_document(&self, path: &Path) -> usize {
        let mut entries = self.entries.lock();
        let keys_to_remove: Vec<RenderKey> = entries
            .iter()
            .filter(|(k, _)| k.path() == path)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys_to_remove {
            entries.pop(key);
        }
        keys_to_remove.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ImageFormat;

    fn page(path: &str, index: usize) -> Arc<RenderedPage> {
        let key = RenderKey::new(path, index, 1080, 1.0, 0, ImageFormat::Png, None);
        Arc::new(RenderedPage::new(key, vec![index as u8; 4]))
    }

    #[test]
    fn test_lru_eviction_by_count() {
        let cache = MemoryCache::new(2);
        let a = page("/a.pdf", 0);
        let b = page("/a.pdf", 1);
        let c = page("/a.pdf", 2);

        cache.put(a.clone());
        cache.put(b.clone());
        assert!(cache.get(&a.key).is_some());
        cache.put(c.clone());

        assert!(cache.contains(&a.key));
        assert!(!cache.contains(&b.key));
        assert!(cache.contains(&c.key));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_put_overwrites_same_key() {
        let cache = MemoryCache::new(4);
        let first = page("/a.pdf", 0);
        let second = Arc::new(RenderedPage::new(first.key.clone(), vec![9, 9]));

        cache.put(first.clone());
        cache.put(second);

        assert_eq!(cache.len(), 1);
        assert_eq!(&cache.get(&first.key).unwrap().data[..], &[9, 9]);
    }

    #[test]
    fn test_remove_document() {
        let cache = MemoryCache::new(8);
        cache.put(page("/a.pdf", 0));
        cache.put(page("/a.pdf", 1));
        cache.put(page("/b.pdf", 0));

        assert_eq!(cache.remove_document(Path::new("/a.pdf")), 2);
        assert_eq!(cache.len(), 1);
    }
}
