//! In-memory blob cache for testing.

use super::{BlobCache, CacheStats, FACE_CROPS_CACHE};
use crate::error::StorageError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

struct Blob {
    data: Vec<u8>,
    cached_at: SystemTime,
}

/// In-memory blob cache
///
/// Useful for testing and scenarios where persistence isn't needed.
pub struct InMemoryBlobCache {
    namespace: String,
    entries: RwLock<HashMap<String, Blob>>,
    writes: AtomicUsize,
}

impl InMemoryBlobCache {
    /// Create an empty cache for the face crop namespace
    pub fn new() -> Self {
        Self::with_namespace(FACE_CROPS_CACHE)
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `put` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn poisoned(&self) -> StorageError {
        StorageError::Corrupted {
            path: PathBuf::from(format!("memory:{}", self.namespace)),
        }
    }
}

impl Default for InMemoryBlobCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobCache for InMemoryBlobCache {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        entries.insert(
            key.to_string(),
            Blob {
                data: blob.to_vec(),
                cached_at: SystemTime::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.read().map_err(|_| self.poisoned())?;
        Ok(entries.get(key).map(|blob| blob.data.clone()))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        entries.clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, StorageError> {
        let entries = self.entries.read().map_err(|_| self.poisoned())?;

        Ok(CacheStats {
            total_entries: entries.len(),
            total_size_bytes: entries.values().map(|b| b.data.len() as u64).sum(),
            oldest_entry: entries.values().map(|b| b.cached_at).min(),
            newest_entry: entries.values().map(|b| b.cached_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_miss_returns_none() {
        let cache = InMemoryBlobCache::new();
        assert!(cache.get("1-missing").unwrap().is_none());
    }

    #[test]
    fn cache_hit_returns_blob() {
        let cache = InMemoryBlobCache::new();
        cache.put("1-a", &[0xDE, 0xAD]).unwrap();
        assert_eq!(cache.get("1-a").unwrap(), Some(vec![0xDE, 0xAD]));
        assert!(cache.contains("1-a").unwrap());
    }

    #[test]
    fn put_overwrites_existing_key() {
        let cache = InMemoryBlobCache::new();
        cache.put("1-a", &[1, 2, 3]).unwrap();
        cache.put("1-a", &[9]).unwrap();

        assert_eq!(cache.get("1-a").unwrap(), Some(vec![9]));
        assert_eq!(cache.stats().unwrap().total_entries, 1);
        assert_eq!(cache.write_count(), 2);
    }

    #[test]
    fn remove_and_clear() {
        let cache = InMemoryBlobCache::new();
        cache.put("1-a", &[1]).unwrap();
        cache.put("1-b", &[2]).unwrap();

        cache.remove("1-a").unwrap();
        assert!(cache.get("1-a").unwrap().is_none());

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn default_namespace_is_face_crops() {
        assert_eq!(InMemoryBlobCache::new().namespace(), "face-crops");
    }
}
