//! Global LRU cache for downloaded rasters.
//!
//! An optimization layer external to the fetch/patchify core: the cache is
//! keyed by `(service base URL, max_size)` so a repeated `download` with
//! the same arguments can be served from memory. The core never consults
//! it; callers opt in explicitly, preserving the pipeline's determinism.

use std::sync::{Arc, LazyLock, Mutex};

use lru::LruCache;

use crate::raster::Raster;

const CACHE_CAPACITY_BYTES: usize = 512 * 1024 * 1024; // 512 MB upper bound

/// Key for cached full-image downloads.
#[derive(Clone, PartialEq, Eq, Hash)]
struct RasterKey {
    /// Service base URL identifying the image
    base_url: Arc<str>,
    /// `None` = full resolution, `Some(n)` = longer edge scaled to n
    max_size: Option<u32>,
}

impl RasterKey {
    fn new(base_url: &str, max_size: Option<u32>) -> Self {
        Self { base_url: Arc::from(base_url), max_size }
    }
}

struct CacheEntry {
    raster: Arc<Raster>,
    size_bytes: usize,
}

/// Byte-budgeted LRU over downloaded rasters.
pub struct RasterCache {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<RasterKey, CacheEntry>,
}

impl RasterCache {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            current_bytes: 0,
            capacity_bytes,
            entries: LruCache::unbounded(),
        }
    }

    fn get(&mut self, key: &RasterKey) -> Option<Arc<Raster>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.raster))
    }

    fn contains(&mut self, key: &RasterKey) -> bool {
        self.entries.contains(key)
    }

    fn insert(&mut self, key: RasterKey, raster: Arc<Raster>, size_bytes: usize) {
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { raster, size_bytes });
    }
}

static RASTER_CACHE: LazyLock<Mutex<RasterCache>> =
    LazyLock::new(|| Mutex::new(RasterCache::new(CACHE_CAPACITY_BYTES)));

/// Get a cached download for `(base_url, max_size)`.
#[must_use]
pub fn get(base_url: &str, max_size: Option<u32>) -> Option<Arc<Raster>> {
    let key = RasterKey::new(base_url, max_size);
    RASTER_CACHE.lock().unwrap().get(&key)
}

/// Check whether a download is cached.
#[must_use]
pub fn contains(base_url: &str, max_size: Option<u32>) -> bool {
    let key = RasterKey::new(base_url, max_size);
    RASTER_CACHE.lock().unwrap().contains(&key)
}

/// Insert a downloaded raster into the cache.
pub fn insert(base_url: &str, max_size: Option<u32>, raster: Arc<Raster>) {
    let size_bytes = raster.data().len();
    let key = RasterKey::new(base_url, max_size);
    RASTER_CACHE.lock().unwrap().insert(key, raster, size_bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster_of(bytes: usize) -> Arc<Raster> {
        // bytes must be a multiple of 3 (one row, bytes/3 pixels)
        Arc::new(Raster::new(vec![0; bytes], (bytes / 3) as u32, 1).unwrap())
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = RasterCache::new(1024);
        let key = RasterKey::new("https://x.org/a", None);
        cache.insert(key.clone(), raster_of(300), 300);

        assert!(cache.contains(&key));
        assert_eq!(cache.get(&key).unwrap().data().len(), 300);
        assert!(!cache.contains(&RasterKey::new("https://x.org/a", Some(500))));
    }

    #[test]
    fn test_max_size_distinguishes_entries() {
        let mut cache = RasterCache::new(4096);
        cache.insert(RasterKey::new("https://x.org/a", None), raster_of(300), 300);
        cache.insert(RasterKey::new("https://x.org/a", Some(500)), raster_of(150), 150);

        assert_eq!(cache.get(&RasterKey::new("https://x.org/a", None)).unwrap().data().len(), 300);
        assert_eq!(
            cache.get(&RasterKey::new("https://x.org/a", Some(500))).unwrap().data().len(),
            150
        );
    }

    #[test]
    fn test_lru_eviction_respects_byte_budget() {
        let mut cache = RasterCache::new(600);
        cache.insert(RasterKey::new("a", None), raster_of(300), 300);
        cache.insert(RasterKey::new("b", None), raster_of(300), 300);
        // Third insert evicts the least recently used ("a")
        cache.insert(RasterKey::new("c", None), raster_of(300), 300);

        assert!(!cache.contains(&RasterKey::new("a", None)));
        assert!(cache.contains(&RasterKey::new("b", None)));
        assert!(cache.contains(&RasterKey::new("c", None)));
        assert!(cache.current_bytes <= 600);
    }

    #[test]
    fn test_oversized_entry_never_inserted() {
        let mut cache = RasterCache::new(100);
        cache.insert(RasterKey::new("big", None), raster_of(300), 300);
        assert!(!cache.contains(&RasterKey::new("big", None)));
    }

    #[test]
    fn test_reinsert_replaces_without_leaking_bytes() {
        let mut cache = RasterCache::new(1000);
        let key = RasterKey::new("a", None);
        cache.insert(key.clone(), raster_of(300), 300);
        cache.insert(key.clone(), raster_of(600), 600);
        assert_eq!(cache.current_bytes, 600);
        assert_eq!(cache.get(&key).unwrap().data().len(), 600);
    }
}
