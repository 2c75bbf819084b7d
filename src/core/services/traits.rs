//! Collaborator traits consumed by the sync stages.
//!
//! Each role is a small capability set. Stage code only sees these traits;
//! concrete variants are chosen when the `SyncContext` is built.

use crate::core::config::{ClusteringConfig, FaceCropConfig};
use crate::core::face::{CropBox, Dimensions, Face, FaceAlignment, FaceDetection, FaceEmbedding};
use crate::core::image::AlignedFaces;
use crate::core::method::VersionedMethod;
use crate::core::ml_file::ClusteringResult;
use crate::error::ServiceError;
use image::RgbImage;

/// Finds faces in a bitmap
pub trait FaceDetectionService: Send + Sync {
    /// The algorithm behind `detect_faces`
    fn method(&self) -> VersionedMethod;

    /// Detect faces, in pixel coordinates of `image`
    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, ServiceError>;

    /// Express a pixel-space detection as fractions of the image size
    fn get_relative_detection(
        &self,
        detection: &FaceDetection,
        dimensions: Dimensions,
    ) -> FaceDetection {
        detection.to_relative(dimensions)
    }
}

/// A cropped face bitmap and where it was taken from
#[derive(Debug, Clone)]
pub struct FaceCropImage {
    pub image: RgbImage,
    pub image_box: CropBox,
}

/// Cuts face thumbnails out of a bitmap
pub trait FaceCropService: Send + Sync {
    fn method(&self) -> VersionedMethod;

    /// Crop the face described by a pixel-space `detection`
    fn get_face_crop(
        &self,
        image: &RgbImage,
        detection: &FaceDetection,
        config: &FaceCropConfig,
    ) -> Result<FaceCropImage, ServiceError>;
}

/// Computes the transform that aligns a face for embedding
pub trait FaceAlignmentService: Send + Sync {
    fn method(&self) -> VersionedMethod;

    /// Alignment of a pixel-space `detection`
    fn get_face_alignment(&self, detection: &FaceDetection) -> FaceAlignment;
}

/// Turns aligned faces into embedding vectors
pub trait FaceEmbeddingService: Send + Sync {
    fn method(&self) -> VersionedMethod;

    /// Side of the square face input the model expects
    fn face_size(&self) -> usize;

    /// One embedding per face in `faces`, in buffer order
    fn get_face_embeddings(&self, faces: &AlignedFaces) -> Result<Vec<FaceEmbedding>, ServiceError>;
}

/// Scores how sharp each aligned face is
pub trait BlurDetectionService: Send + Sync {
    fn method(&self) -> VersionedMethod;

    /// One score per face, higher is sharper
    fn detect_blur(&self, aligned: &AlignedFaces, faces: &[Face]) -> Vec<f32>;
}

/// Groups embeddings across the whole library
pub trait FaceClusteringService: Send + Sync {
    fn method(&self) -> VersionedMethod;

    /// Label every embedding with a cluster or as noise, in input order
    fn cluster(
        &self,
        embeddings: &[FaceEmbedding],
        config: &ClusteringConfig,
    ) -> Result<ClusteringResult, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::BoundingBox;

    struct NoFaces;

    impl FaceDetectionService for NoFaces {
        fn method(&self) -> VersionedMethod {
            VersionedMethod::new("None", 1)
        }

        fn detect_faces(&self, _image: &RgbImage) -> Result<Vec<FaceDetection>, ServiceError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn relative_detection_divides_by_dimensions() {
        let detection = FaceDetection {
            bbox: BoundingBox::new(50.0, 100.0, 100.0, 100.0),
            landmarks: Vec::new(),
            probability: 0.9,
        };
        let relative = NoFaces.get_relative_detection(&detection, Dimensions::new(200, 400));

        assert!((relative.bbox.x - 0.25).abs() < 1e-6);
        assert!((relative.bbox.width - 0.5).abs() < 1e-6);
        assert!((relative.bbox.height - 0.25).abs() < 1e-6);
    }
}
