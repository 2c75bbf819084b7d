//! In-memory artifact store for testing.

use super::{MlStore, StoreStats};
use crate::core::face::{Face, FileId};
use crate::core::ml_file::{MlFile, MlLibraryData};
use crate::error::StorageError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory artifact store
///
/// Useful for testing and scenarios where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryMlStore {
    files: RwLock<BTreeMap<FileId, MlFile>>,
    library: RwLock<MlLibraryData>,
    file_writes: AtomicUsize,
}

impl InMemoryMlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put_ml_file` calls so far
    pub fn file_write_count(&self) -> usize {
        self.file_writes.load(Ordering::SeqCst)
    }

    fn poisoned() -> StorageError {
        StorageError::Corrupted {
            path: PathBuf::from("memory"),
        }
    }
}

impl MlStore for InMemoryMlStore {
    fn get_ml_file(&self, file_id: FileId) -> Result<Option<MlFile>, StorageError> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files.get(&file_id).cloned())
    }

    fn put_ml_file(&self, file: &MlFile) -> Result<(), StorageError> {
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.insert(file.file_id, file.clone());
        self.file_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn file_ids(&self) -> Result<Vec<FileId>, StorageError> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files.keys().copied().collect())
    }

    fn get_all_faces_map(&self) -> Result<BTreeMap<FileId, Vec<Face>>, StorageError> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files
            .iter()
            .filter_map(|(id, file)| file.faces.clone().map(|faces| (*id, faces)))
            .collect())
    }

    fn get_library_data(&self) -> Result<MlLibraryData, StorageError> {
        let library = self.library.read().map_err(|_| Self::poisoned())?;
        Ok(library.clone())
    }

    fn put_library_data(&self, data: &MlLibraryData) -> Result<(), StorageError> {
        let mut library = self.library.write().map_err(|_| Self::poisoned())?;
        *library = data.clone();
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, StorageError> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(StoreStats::from_files(files.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::method::VersionedMethod;

    #[test]
    fn missing_file_returns_none() {
        assert!(InMemoryMlStore::new().get_ml_file(1).unwrap().is_none());
    }

    #[test]
    fn put_replaces_whole_file() {
        let store = InMemoryMlStore::new();
        let mut file = MlFile::new(1);
        file.faces = Some(Vec::new());
        file.face_detection_method = Some(VersionedMethod::new("YoloFace", 1));
        store.put_ml_file(&file).unwrap();

        store.put_ml_file(&MlFile::new(1)).unwrap();

        let stored = store.get_ml_file(1).unwrap().unwrap();
        assert!(stored.face_detection_method.is_none());
        assert_eq!(store.file_write_count(), 2);
    }

    #[test]
    fn faces_map_skips_files_without_detection() {
        let store = InMemoryMlStore::new();
        let mut detected = MlFile::new(2);
        detected.faces = Some(Vec::new());
        store.put_ml_file(&detected).unwrap();
        store.put_ml_file(&MlFile::new(3)).unwrap();

        let map = store.get_all_faces_map().unwrap();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(store.file_ids().unwrap(), vec![2, 3]);
    }

    #[test]
    fn library_data_defaults_then_persists() {
        let store = InMemoryMlStore::new();
        assert_eq!(store.get_library_data().unwrap(), MlLibraryData::default());

        let data = MlLibraryData {
            face_clustering_method: Some(VersionedMethod::new("Dbscan", 1)),
            ..MlLibraryData::default()
        };
        store.put_library_data(&data).unwrap();
        assert_eq!(store.get_library_data().unwrap(), data);
    }
}
