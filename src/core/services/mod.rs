//! # Services Module
//!
//! The collaborators the sync stages call, one trait per role, plus the
//! built-in implementations that need no model runtime.
//!
//! ## Built-in Implementations
//! | Role | Implementation |
//! |------|----------------|
//! | Crop | `ImageFaceCropper` - padded square, bounded size |
//! | Alignment | `SimilarityFaceAligner` - 5-point ArcFace template |
//! | Blur | `LaplacianBlurDetector` - Laplacian variance |
//! | Clustering | `DbscanClusterer` - deterministic DBSCAN |
//!
//! Face detection and embedding wrap model runtimes and are supplied by the
//! host application.

mod alignment;
mod blur;
mod clustering;
mod crop;
mod traits;

pub use alignment::SimilarityFaceAligner;
pub use blur::LaplacianBlurDetector;
pub use clustering::DbscanClusterer;
pub use crop::ImageFaceCropper;
pub use traits::{
    BlurDetectionService, FaceAlignmentService, FaceClusteringService, FaceCropImage,
    FaceCropService, FaceDetectionService, FaceEmbeddingService,
};
