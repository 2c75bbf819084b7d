//! # Cache Module
//!
//! Blob storage for encoded face crops.
//!
//! Entries are keyed by face id inside a namespace. Writing an existing key
//! replaces its value, so re-cropping a face never leaves a stale blob
//! behind.
//!
//! ## Backends
//! - `SqliteBlobCache` - Persistent storage using SQLite
//! - `InMemoryBlobCache` - For testing

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryBlobCache;
pub use sqlite::SqliteBlobCache;
pub use traits::BlobCache;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Namespace holding encoded face crops
pub const FACE_CROPS_CACHE: &str = "face-crops";

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of entries
    pub total_entries: usize,
    /// Total size of cached data in bytes
    pub total_size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_empty() {
        let stats = CacheStats::default();
        assert_eq!(stats.total_entries, 0);
        assert!(stats.oldest_entry.is_none());
    }
}
