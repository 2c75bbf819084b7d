//! # Error Module
//!
//! Error types for the ML sync pipeline.
//!
//! ## Design Principles
//! - **Skips are not errors** - too-small images, unsupported formats and
//!   cancelled requests are outcomes, not `Err` values
//! - **Include context** - file ids, face ids, paths, what went wrong
//! - **Failures leave state alone** - a failed file keeps its previous artifacts

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level library error
#[derive(Error, Debug)]
pub enum MlSyncError {
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Face error: {0}")]
    Face(#[from] FaceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors that occur while acquiring or transforming image bitmaps
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode image {path}: {reason}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Failed to open image file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No image registered for file {file_id}")]
    UnknownFile { file_id: u64 },

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Errors raised by a detector running behind the single-flight queue
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Detection failed: {0}")]
    Failed(String),

    #[error("Detector initialization failed: {0}")]
    InitFailed(String),

    #[error("Detection timed out after {after:?}; detector will be re-initialized")]
    TimedOut { after: Duration },

    #[error("Detector worker stopped unexpectedly")]
    Crashed,

    #[error("Detection queue is closed")]
    QueueClosed,
}

/// Errors raised by the ML collaborators of the face pipeline
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Face detection failed: {0}")]
    Detection(String),

    #[error("Face crop failed: {0}")]
    Crop(String),

    #[error("Face embedding failed: {0}")]
    Embedding(String),

    #[error("Face clustering failed: {0}")]
    Clustering(String),

    #[error("{stage} returned {actual} results for {expected} faces")]
    CountMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Image dimensions unknown for file {file_id}")]
    MissingImageDimensions { file_id: u64 },
}

/// Errors from the blob cache and the artifact store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Storage corruption detected at {path}. Delete this file and sync again.")]
    Corrupted { path: PathBuf },

    #[error("Failed to serialize ML data: {0}")]
    SerializationFailed(String),
}

/// Errors looking up stored faces
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Face not found: {face_id}")]
    NotFound { face_id: String },

    #[error("Malformed face id: {face_id}")]
    InvalidId { face_id: String },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, MlSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_includes_path() {
        let error = ImageError::DecodeError {
            path: PathBuf::from("/photos/broken.jpg"),
            reason: "invalid JPEG".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/photos/broken.jpg"));
        assert!(message.contains("invalid JPEG"));
    }

    #[test]
    fn missing_face_reads_face_not_found() {
        let error: MlSyncError = FaceError::NotFound {
            face_id: "42-00ff".to_string(),
        }
        .into();
        assert!(error.to_string().contains("Face not found: 42-00ff"));
    }

    #[test]
    fn timeout_mentions_reinitialization() {
        let error = DetectorError::TimedOut {
            after: Duration::from_secs(10),
        };
        assert!(error.to_string().contains("re-initialized"));
    }

    #[test]
    fn storage_error_suggests_recovery() {
        let error = StorageError::Corrupted {
            path: PathBuf::from("/data/ml.db"),
        };
        assert!(error.to_string().contains("Delete this file"));
    }
}
