//! SQLite blob cache for persistent storage.

use super::{BlobCache, CacheStats, FACE_CROPS_CACHE};
use crate::error::StorageError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// SQLite-backed persistent blob cache
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while a crop is
/// being written.
pub struct SqliteBlobCache {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    namespace: String,
}

impl SqliteBlobCache {
    /// Open or create a cache database for the face crop namespace
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_namespace(path, FACE_CROPS_CACHE)
    }

    /// Open or create a cache database scoped to `namespace`
    pub fn open_namespace(path: &Path, namespace: &str) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StorageError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                data BLOB NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            namespace: namespace.to_string(),
        })
    }

    fn to_timestamp(time: SystemTime) -> i64 {
        time.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }

    fn from_timestamp(timestamp: i64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Corrupted {
            path: self.db_path.clone(),
        })
    }
}

impl BlobCache for SqliteBlobCache {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO blobs (namespace, key, data, cached_at) VALUES (?, ?, ?, ?)",
            params![
                self.namespace,
                key,
                blob,
                Self::to_timestamp(SystemTime::now())
            ],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM blobs WHERE namespace = ? AND key = ?",
            params![self.namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM blobs WHERE namespace = ? AND key = ?",
            params![self.namespace, key],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM blobs WHERE namespace = ?", [&self.namespace])
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, StorageError> {
        let conn = self.lock()?;

        let (total_entries, total_size_bytes, oldest, newest) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0), MIN(cached_at), MAX(cached_at)
                 FROM blobs WHERE namespace = ?",
                [&self.namespace],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(CacheStats {
            total_entries: total_entries as usize,
            total_size_bytes: total_size_bytes as u64,
            oldest_entry: oldest.map(Self::from_timestamp),
            newest_entry: newest.map(Self::from_timestamp),
        })
    }
}
