//! Cache (component D): a process-wide, thread-safe LRU over blob payloads
//! with a byte-budget threshold, and the three-tier miss path (cache → local
//! blob store → remote blob store).

use crate::blob_store::{LocalBlobStore, RemoteBlobStore};
use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

struct CacheEntry {
    bytes: Arc<Vec<u8>>,
    size: usize,
    tenant: String,
    last_used: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
}

/// Bounded LRU cache over `storage_path -> bytes`. `max_bytes` is fixed for
/// the cache's lifetime unless explicitly reconfigured; the cache evicts
/// down to `threshold * max_bytes` on every admission.
pub struct Cache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    current_bytes: Mutex<usize>,
    max_bytes: usize,
    threshold: f64,
    clock: AtomicU64,
    stats: Mutex<CacheStats>,
}

impl Cache {
    pub fn new(max_bytes: usize, threshold: f64) -> Self {
        assert!(threshold > 0.0 && threshold <= 1.0, "threshold must be in (0, 1]");
        Cache {
            entries: Mutex::new(HashMap::new()),
            current_bytes: Mutex::new(0),
            max_bytes,
            threshold,
            clock: AtomicU64::new(0),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Derive `max_bytes` from the local blob store's current footprint
    /// times a configured factor, per §4.4.
    pub fn from_local_store(local: &LocalBlobStore, factor: f64, threshold: f64) -> Self {
        let observed = local.total_bytes() as f64 * factor;
        let max_bytes = observed.max(1.0) as usize;
        Self::new(max_bytes, threshold)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self, storage_path: &str) -> Option<Arc<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let mut stats = self.stats.lock().expect("cache stats mutex poisoned");
        if let Some(entry) = entries.get_mut(storage_path) {
            entry.last_used = self.tick();
            stats.hits += 1;
            log::trace!("cache hit for {storage_path}");
            Some(entry.bytes.clone())
        } else {
            stats.misses += 1;
            log::trace!("cache miss for {storage_path}");
            None
        }
    }

    /// Promote an existing entry to MRU without re-reading its bytes.
    pub fn touch(&self, storage_path: &str) {
        if let Some(entry) = self.entries.lock().expect("cache mutex poisoned").get_mut(storage_path) {
            entry.last_used = self.tick();
        }
    }

    pub fn remove(&self, storage_path: &str) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(entry) = entries.remove(storage_path) {
            let mut current = self.current_bytes.lock().expect("cache size mutex poisoned");
            *current = current.saturating_sub(entry.size);
        }
    }

    /// Insert `bytes` as MRU, evicting LRU entries until the admission fits
    /// under `threshold * max_bytes`. Fails with `Oversized` (no
    /// partial-admit) if the entry cannot fit even after evicting
    /// everything else.
    pub fn put(&self, storage_path: String, bytes: Vec<u8>, tenant: String) -> EngineResult<Arc<Vec<u8>>> {
        let size = bytes.len();
        if size > self.max_bytes {
            return Err(EngineError::Oversized(format!(
                "entry of {size} bytes exceeds cache capacity of {} bytes",
                self.max_bytes
            )));
        }

        let budget = (self.max_bytes as f64 * self.threshold) as usize;
        let bytes = Arc::new(bytes);

        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let mut current = self.current_bytes.lock().expect("cache size mutex poisoned");
        let mut stats = self.stats.lock().expect("cache stats mutex poisoned");

        if let Some(old) = entries.remove(&storage_path) {
            *current = current.saturating_sub(old.size);
        }

        if *current + size > budget {
            let to_free = (*current + size).saturating_sub(budget);
            let mut candidates: Vec<(String, u64, usize)> = entries.iter().map(|(k, v)| (k.clone(), v.last_used, v.size)).collect();
            candidates.sort_by_key(|(_, last_used, _)| *last_used);

            let mut freed = 0;
            for (key, _, candidate_size) in candidates {
                if freed >= to_free {
                    break;
                }
                entries.remove(&key);
                freed += candidate_size;
                stats.evictions += 1;
                log::trace!("cache evicted {key} ({candidate_size} bytes) to admit {storage_path}");
            }
            *current = current.saturating_sub(freed);
        }

        *current += size;
        stats.insertions += 1;
        entries.insert(storage_path, CacheEntry { bytes: bytes.clone(), size, tenant, last_used: self.tick() });
        Ok(bytes)
    }

    /// The canonical miss path used by reads: cache → local blob store →
    /// remote blob store, populating on the way back up.
    pub fn fetch_if_missing(
        &self,
        uid: Uuid,
        version_ts: &str,
        storage_path: &str,
        tenant: &str,
        local: &LocalBlobStore,
        remote: &RemoteBlobStore,
    ) -> EngineResult<Arc<Vec<u8>>> {
        let _ = (uid, version_ts);
        if let Some(bytes) = self.get(storage_path) {
            return Ok(bytes);
        }

        if local.exists(storage_path, tenant) {
            let bytes = local.get(storage_path, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
            return self.put(storage_path.to_string(), bytes, tenant.to_string());
        }

        let bytes = remote.get(storage_path, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
        local.put(uid, version_ts, &bytes, tenant).map_err(|e| EngineError::Io(e.to_string()))?;
        self.put(storage_path.to_string(), bytes, tenant.to_string())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().expect("cache stats mutex poisoned").clone()
    }

    pub fn current_bytes(&self) -> usize {
        *self.current_bytes.lock().expect("cache size mutex poisoned")
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_lru_until_under_threshold() {
        let cache = Cache::new(2048, 1.0);
        cache.put("a".into(), vec![1u8; 1000], "t1".into()).unwrap();
        cache.put("b".into(), vec![2u8; 1000], "t1".into()).unwrap();
        cache.put("c".into(), vec![3u8; 500], "t1".into()).unwrap();

        assert!(cache.get("a").is_none(), "oldest entry should have been evicted");
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.current_bytes() <= cache.max_bytes());
    }

    #[test]
    fn oversized_entry_is_rejected_without_partial_admit() {
        let cache = Cache::new(100, 1.0);
        let result = cache.put("big".into(), vec![0u8; 200], "t1".into());
        assert!(matches!(result, Err(EngineError::Oversized(_))));
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn fetch_if_missing_promotes_from_local_then_remote() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalBlobStore::new(dir.path().to_path_buf()).unwrap();
        let remote = RemoteBlobStore::new();
        let cache = Cache::new(1 << 20, 1.0);

        let uid = Uuid::new_v4();
        let ts = "20260101_000000.000_0000";
        let storage_path = remote.path_for(uid, ts, "t1");
        remote.put(&storage_path, b"from remote", "t1").unwrap();

        let bytes = cache.fetch_if_missing(uid, ts, &storage_path, "t1", &local, &remote).unwrap();
        assert_eq!(bytes.as_slice(), b"from remote");
        assert!(local.exists(&storage_path, "t1"), "remote hit should backfill local");
        assert!(cache.get(&storage_path).is_some(), "remote hit should backfill cache");
    }
}
