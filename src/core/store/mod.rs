//! # Store Module
//!
//! Persistence of per-file ML artifacts and library-wide ML data.
//!
//! Each `MlFile` is written as a single row, so a file's artifacts are either
//! fully replaced or left untouched.
//!
//! ## Backends
//! - `SqliteMlStore` - Persistent storage using SQLite
//! - `InMemoryMlStore` - For testing

mod memory;
mod sqlite;

pub use memory::InMemoryMlStore;
pub use sqlite::SqliteMlStore;

use crate::core::face::{Face, FileId};
use crate::core::ml_file::{MlFile, MlLibraryData};
use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artifact store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Files with stored artifacts
    pub files: usize,
    /// Faces across all files
    pub faces: usize,
    /// Faces carrying an embedding
    pub embedded_faces: usize,
}

impl StoreStats {
    /// Tally the faces of a set of stored files
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a MlFile>) -> Self {
        let mut stats = StoreStats::default();
        for file in files {
            stats.files += 1;
            stats.faces += file.faces().map_or(0, |f| f.len());
            stats.embedded_faces += file.embedded_face_count();
        }
        stats
    }
}

/// Trait for artifact store backends
pub trait MlStore: Send + Sync {
    /// Stored artifacts of a file
    fn get_ml_file(&self, file_id: FileId) -> Result<Option<MlFile>, StorageError>;

    /// Replace the stored artifacts of a file in one write
    fn put_ml_file(&self, file: &MlFile) -> Result<(), StorageError>;

    /// Ids of every file with stored artifacts, ascending
    fn file_ids(&self) -> Result<Vec<FileId>, StorageError>;

    /// A single stored face
    fn get_face(&self, file_id: FileId, face_id: &str) -> Result<Option<Face>, StorageError> {
        Ok(self
            .get_ml_file(file_id)?
            .and_then(|file| file.faces)
            .and_then(|faces| faces.into_iter().find(|face| face.id == face_id)))
    }

    /// Faces of every file that has run detection, keyed by file id
    fn get_all_faces_map(&self) -> Result<BTreeMap<FileId, Vec<Face>>, StorageError>;

    /// Library-wide ML data, default when nothing is stored yet
    fn get_library_data(&self) -> Result<MlLibraryData, StorageError>;

    /// Replace the library-wide ML data
    fn put_library_data(&self, data: &MlLibraryData) -> Result<(), StorageError>;

    /// Get store statistics
    fn stats(&self) -> Result<StoreStats, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::{BoundingBox, Dimensions, FaceDetection};

    fn file_with_faces(file_id: FileId, count: usize, embedded: usize) -> MlFile {
        let dims = Dimensions::new(100, 100);
        let faces = (0..count)
            .map(|i| {
                let detection = FaceDetection {
                    bbox: BoundingBox::new(10.0 * i as f32 + 5.0, 5.0, 8.0, 8.0),
                    landmarks: Vec::new(),
                    probability: 0.9,
                };
                let mut face = Face::detected(file_id, detection, dims);
                if i < embedded {
                    face.embedding = Some(vec![1.0, 0.0]);
                }
                face
            })
            .collect();
        let mut file = MlFile::new(file_id);
        file.faces = Some(faces);
        file
    }

    #[test]
    fn stats_count_faces_and_embeddings() {
        let files = [file_with_faces(1, 3, 2), file_with_faces(2, 1, 0), MlFile::new(3)];
        let stats = StoreStats::from_files(files.iter());

        assert_eq!(
            stats,
            StoreStats {
                files: 3,
                faces: 4,
                embedded_faces: 2
            }
        );
    }

    #[test]
    fn get_face_finds_face_by_id() {
        let store = InMemoryMlStore::new();
        let file = file_with_faces(8, 2, 0);
        let wanted = file.faces().unwrap()[1].id.clone();
        store.put_ml_file(&file).unwrap();

        let face = store.get_face(8, &wanted).unwrap().unwrap();
        assert_eq!(face.id, wanted);
        assert!(store.get_face(8, "8-nope").unwrap().is_none());
        assert!(store.get_face(9, &wanted).unwrap().is_none());
    }
}
