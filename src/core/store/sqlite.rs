//! SQLite artifact store for persistent storage.

use super::{MlStore, StoreStats};
use crate::core::face::{Face, FileId};
use crate::core::ml_file::{MlFile, MlLibraryData};
use crate::error::StorageError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed artifact store
///
/// Each file's artifacts are one JSON row, replaced with a single
/// `INSERT OR REPLACE`. Uses WAL mode like the blob cache.
pub struct SqliteMlStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteMlStore {
    /// Open or create a store database at the given path
    pub fn open(path: &Path) -> Result<Self, StorageError> {
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
            "CREATE TABLE IF NOT EXISTS ml_files (
                file_id INTEGER PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER
            )",
            [],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS library_data (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                data TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Corrupted {
            path: self.db_path.clone(),
        })
    }

    fn decode_file(json: &str) -> Result<MlFile, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::SerializationFailed(e.to_string()))
    }

    fn all_files(&self) -> Result<Vec<MlFile>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM ml_files ORDER BY file_id")
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(|json| Self::decode_file(json)).collect()
    }
}

impl MlStore for SqliteMlStore {
    fn get_ml_file(&self, file_id: FileId) -> Result<Option<MlFile>, StorageError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM ml_files WHERE file_id = ?",
                [file_id as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        json.as_deref().map(Self::decode_file).transpose()
    }

    fn put_ml_file(&self, file: &MlFile) -> Result<(), StorageError> {
        let json = serde_json::to_string(file)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ml_files (file_id, data, updated_at) VALUES (?, ?, ?)",
            params![
                file.file_id as i64,
                json,
                file.updated_at.map(|t| t.timestamp())
            ],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn file_ids(&self) -> Result<Vec<FileId>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT file_id FROM ml_files ORDER BY file_id")
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .map(|r| r.map(|id| id as FileId))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(ids)
    }

    fn get_all_faces_map(&self) -> Result<BTreeMap<FileId, Vec<Face>>, StorageError> {
        Ok(self
            .all_files()?
            .into_iter()
            .filter_map(|file| file.faces.map(|faces| (file.file_id, faces)))
            .collect())
    }

    fn get_library_data(&self) -> Result<MlLibraryData, StorageError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row("SELECT data FROM library_data WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match json {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| StorageError::SerializationFailed(e.to_string())),
            None => Ok(MlLibraryData::default()),
        }
    }

    fn put_library_data(&self, data: &MlLibraryData) -> Result<(), StorageError> {
        let json = serde_json::to_string(data)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO library_data (id, data) VALUES (0, ?)",
            [&json],
        )
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let files = self.all_files()?;
        Ok(StoreStats::from_files(files.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::method::VersionedMethod;
    use crate::core::ml_file::{ClusterLabel, ClusteringResult, ImageSource};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn sqlite_store_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("ml.db");

        let store = SqliteMlStore::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn sqlite_store_round_trips_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteMlStore::open(&temp_dir.path().join("ml.db")).unwrap();

        let mut file = MlFile::new(11);
        file.faces = Some(Vec::new());
        file.image_source = Some(ImageSource::Converted);
        file.face_detection_method = Some(VersionedMethod::new("YoloFace", 2));
        file.updated_at = Some(Utc::now());
        store.put_ml_file(&file).unwrap();

        assert_eq!(store.get_ml_file(11).unwrap(), Some(file));
        assert!(store.get_ml_file(12).unwrap().is_none());
        assert_eq!(store.file_ids().unwrap(), vec![11]);
    }

    #[test]
    fn sqlite_store_persists_library_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("ml.db");

        let data = MlLibraryData {
            face_clustering_results: Some(ClusteringResult::new(vec![
                ClusterLabel::Cluster(0),
                ClusterLabel::Noise,
            ])),
            face_clustering_method: Some(VersionedMethod::new("Dbscan", 1)),
            clustered_face_ids: vec!["1-a".into(), "1-b".into()],
            clustered_at: Some(Utc::now()),
        };
        SqliteMlStore::open(&db_path)
            .unwrap()
            .put_library_data(&data)
            .unwrap();

        let reopened = SqliteMlStore::open(&db_path).unwrap();
        assert_eq!(reopened.get_library_data().unwrap(), data);
    }

    #[test]
    fn corrupt_row_is_serialization_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteMlStore::open(&temp_dir.path().join("ml.db")).unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO ml_files (file_id, data) VALUES (5, '{broken')",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.get_ml_file(5),
            Err(StorageError::SerializationFailed(_))
        ));
    }
}
