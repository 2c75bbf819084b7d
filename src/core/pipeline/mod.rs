//! # Pipeline Module
//!
//! Orchestrates an incremental ML sync pass over a set of files.
//!
//! ## Per-file stages
//! 1. **Text** - OCR words through the single-flight text queue
//! 2. **Detection** - find faces and assign stable ids
//! 3. **Crop** - cache a JPEG thumbnail per face
//! 4. **Alignment** - align faces and score blur
//! 5. **Embedding** - one vector per aligned face
//! 6. **Relative** - store detections as image fractions
//!
//! Every stage reuses the previous pass's output when its method is
//! current and the faces it depends on are unchanged.
//!
//! ## Library stage
//! Clustering runs after the files when any embedding changed or the
//! stored clustering method is stale.
//!
//! ## Parallelism
//! Files are synced one at a time. Rayon is used inside warping and
//! clustering.

mod clustering;
mod context;
mod executor;
mod face_sync;
mod text_sync;

pub use clustering::{ClusteringOutcome, ClusteringStage};
pub use context::{FacesMap, MlFileContext, SyncContext, SyncContextBuilder};
pub use executor::{FileFailure, FileSyncOutcome, MlSyncPipeline, SyncRunResult};
pub use face_sync::{
    sync_face_alignments, sync_face_crops, sync_face_detections, sync_face_embeddings,
    sync_relative_detections,
};
pub use text_sync::sync_text;
