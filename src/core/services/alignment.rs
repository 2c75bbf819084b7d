//! Five-point similarity alignment onto the ArcFace landmark template.

use super::traits::FaceAlignmentService;
use crate::core::face::{FaceAlignment, FaceDetection, Point};
use crate::core::method::VersionedMethod;

/// ArcFace reference landmarks for a 112 px face, as unit-square fractions
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946 / 112.0, 51.6963 / 112.0),
    (73.5318 / 112.0, 51.5014 / 112.0),
    (56.0252 / 112.0, 71.7366 / 112.0),
    (41.5493 / 112.0, 92.3655 / 112.0),
    (70.7299 / 112.0, 92.2041 / 112.0),
];

/// Aligns faces with a least-squares similarity transform.
///
/// Detections with five landmarks are mapped onto the ArcFace template.
/// Anything else falls back to mapping the face box onto the unit square.
#[derive(Debug, Default, Clone)]
pub struct SimilarityFaceAligner;

impl SimilarityFaceAligner {
    pub fn new() -> Self {
        Self
    }

    fn from_landmarks(landmarks: &[Point]) -> Option<FaceAlignment> {
        let n = landmarks.len() as f32;
        let (msx, msy) = landmarks
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.x / n, y + p.y / n));
        let (mdx, mdy) = ARCFACE_TEMPLATE
            .iter()
            .fold((0.0, 0.0), |(x, y), t| (x + t.0 / n, y + t.1 / n));

        let mut sxx = 0.0f32;
        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        for (p, t) in landmarks.iter().zip(ARCFACE_TEMPLATE.iter()) {
            let (xs, ys) = (p.x - msx, p.y - msy);
            let (xd, yd) = (t.0 - mdx, t.1 - mdy);
            sxx += xs * xs + ys * ys;
            num_a += xs * xd + ys * yd;
            num_b += xs * yd - ys * xd;
        }

        if sxx <= f32::EPSILON {
            return None;
        }

        let a = num_a / sxx;
        let b = num_b / sxx;
        let tx = mdx - (a * msx - b * msy);
        let ty = mdy - (b * msx + a * msy);

        Some(Self::similarity(a, b, tx, ty))
    }

    fn from_box(detection: &FaceDetection) -> FaceAlignment {
        let bbox = &detection.bbox;
        let side = bbox.width.max(bbox.height).max(f32::EPSILON);
        let center = bbox.center();
        let scale = 1.0 / side;
        Self::similarity(
            scale,
            0.0,
            0.5 - scale * center.x,
            0.5 - scale * center.y,
        )
    }

    fn similarity(a: f32, b: f32, tx: f32, ty: f32) -> FaceAlignment {
        let norm = a * a + b * b;
        // Inverse-map the middle of the unit square back into the image.
        let (u, v) = (0.5 - tx, 0.5 - ty);
        let center = Point::new((a * u + b * v) / norm, (-b * u + a * v) / norm);

        FaceAlignment {
            affine_matrix: [[a, -b, tx], [b, a, ty], [0.0, 0.0, 1.0]],
            center,
            size: 1.0 / norm.sqrt(),
            rotation: b.atan2(a),
        }
    }
}

impl FaceAlignmentService for SimilarityFaceAligner {
    fn method(&self) -> VersionedMethod {
        VersionedMethod::new("ArcFace", 1)
    }

    fn get_face_alignment(&self, detection: &FaceDetection) -> FaceAlignment {
        if detection.landmarks.len() == ARCFACE_TEMPLATE.len() {
            if let Some(alignment) = Self::from_landmarks(&detection.landmarks) {
                return alignment;
            }
        }
        Self::from_box(detection)
    }
}
