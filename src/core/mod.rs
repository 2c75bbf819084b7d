//! # Core Module
//!
//! The GUI-agnostic ML sync engine.
//!
//! ## Modules
//! - `method` - Identifies the algorithm behind every stored artifact
//! - `face` - Face geometry, stable face ids and id comparison
//! - `ml_file` - Stored per-file and library-wide artifacts
//! - `image` - Bitmap acquisition, resizing and face warping
//! - `services` - Collaborator traits and built-in implementations
//! - `cache` - Blob cache for encoded face crops
//! - `store` - Persists ML artifacts between runs
//! - `queue` - Single-flight detector queue
//! - `text` - OCR admission, queueing and filtering
//! - `pipeline` - Orchestrates the incremental sync
//! - `config` - Tunable settings

pub mod cache;
pub mod config;
pub mod face;
pub mod image;
pub mod method;
pub mod ml_file;
pub mod pipeline;
pub mod queue;
pub mod services;
pub mod store;
pub mod text;

// Re-export commonly used types
pub use config::SyncConfig;
pub use face::{Face, FaceDetection, FaceId, FileId};
pub use method::{is_different_or_old, VersionedMethod};
pub use ml_file::{ClusteringResult, ImageSource, MlFile, MlLibraryData};
pub use pipeline::{MlSyncPipeline, SyncContext};
