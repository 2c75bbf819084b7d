//! Blob cache trait definition.

use super::CacheStats;
use crate::error::StorageError;

/// Trait for blob cache backends
pub trait BlobCache: Send + Sync {
    /// Namespace this cache writes into
    fn namespace(&self) -> &str;

    /// Store a blob, replacing any previous value under `key`
    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StorageError>;

    /// Fetch a blob
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Whether a blob exists under `key`
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a specific entry
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Clear all entries of this namespace
    fn clear(&self) -> Result<(), StorageError>;

    /// Get cache statistics
    fn stats(&self) -> Result<CacheStats, StorageError>;
}
