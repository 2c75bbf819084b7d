//! Sharpness scoring of aligned faces.
//!
//! Uses Laplacian variance: sharp faces have well-defined edges, which
//! produce a high variance in the Laplacian response.

use super::traits::BlurDetectionService;
use crate::core::face::Face;
use crate::core::image::AlignedFaces;
use crate::core::method::VersionedMethod;

/// Laplacian-variance blur detector
#[derive(Debug, Default, Clone)]
pub struct LaplacianBlurDetector;

impl LaplacianBlurDetector {
    pub fn new() -> Self {
        Self
    }

    /// Laplacian variance of one aligned face, on a 0-255 gray scale
    pub fn face_sharpness(samples: &[f32], face_size: usize) -> f32 {
        if face_size < 3 || samples.len() < face_size * face_size * 3 {
            return 0.0;
        }

        let gray: Vec<f32> = samples
            .chunks_exact(3)
            .map(|rgb| (rgb[0] + rgb[1] + rgb[2]) / 3.0 * 127.5 + 127.5)
            .collect();
        let at = |x: usize, y: usize| gray[y * face_size + x];

        // Laplacian kernel: [0, 1, 0; 1, -4, 1; 0, 1, 0]
        let mut values = Vec::with_capacity((face_size - 2) * (face_size - 2));
        for y in 1..face_size - 1 {
            for x in 1..face_size - 1 {
                let laplacian =
                    at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
                values.push(laplacian);
            }
        }

        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n
    }
}

impl BlurDetectionService for LaplacianBlurDetector {
    fn method(&self) -> VersionedMethod {
        VersionedMethod::new("Laplacian", 1)
    }

    fn detect_blur(&self, aligned: &AlignedFaces, faces: &[Face]) -> Vec<f32> {
        (0..faces.len())
            .map(|i| {
                aligned
                    .face(i)
                    .map(|samples| Self::face_sharpness(samples, aligned.face_size()))
                    .unwrap_or(0.0)
            })
            .collect()
    }
}
