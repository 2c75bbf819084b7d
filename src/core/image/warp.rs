//! Affine warping of face regions into the embedding input buffer.

use crate::core::face::FaceAlignment;
use image::RgbImage;
use rayon::prelude::*;

/// Contiguous aligned-face samples for one file.
///
/// Holds `count * face_size * face_size * 3` values, one row-major RGB
/// square per face, each channel scaled to `[-1, 1]`. Face `i` occupies the
/// `i`-th slice of `face_len()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFaces {
    data: Vec<f32>,
    face_size: usize,
    count: usize,
}

impl AlignedFaces {
    /// Warp every alignment out of `image`, one disjoint slice per face
    pub fn extract(image: &RgbImage, alignments: &[&FaceAlignment], face_size: usize) -> Self {
        let face_len = face_size * face_size * 3;
        let mut data = vec![0.0f32; alignments.len() * face_len];

        if face_len > 0 {
            data.par_chunks_mut(face_len)
                .zip(alignments.par_iter())
                .for_each(|(slice, alignment)| {
                    warp_affine_into(image, alignment, face_size, slice);
                });
        }

        Self {
            data,
            face_size,
            count: alignments.len(),
        }
    }

    /// Wrap an existing buffer; `data.len()` must be `count * face_size² * 3`
    pub fn from_raw(data: Vec<f32>, face_size: usize, count: usize) -> Option<Self> {
        (data.len() == count * face_size * face_size * 3).then_some(Self {
            data,
            face_size,
            count,
        })
    }

    /// Number of faces in the buffer
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Side of each aligned face in samples
    pub fn face_size(&self) -> usize {
        self.face_size
    }

    /// Values per face
    pub fn face_len(&self) -> usize {
        self.face_size * self.face_size * 3
    }

    /// Samples of face `index`
    pub fn face(&self, index: usize) -> Option<&[f32]> {
        if index >= self.count {
            return None;
        }
        let len = self.face_len();
        Some(&self.data[index * len..(index + 1) * len])
    }

    /// The whole buffer
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Sample the aligned square of `alignment` from `image` into `out`.
///
/// `alignment.affine_matrix` maps image pixels onto the unit square; it is
/// scaled by `face_size` here. Each output sample is read from the
/// inverse-mapped image position with bilinear interpolation and edge
/// clamping.
pub fn warp_affine_into(image: &RgbImage, alignment: &FaceAlignment, face_size: usize, out: &mut [f32]) {
    let m = &alignment.affine_matrix;
    let s = face_size as f32;
    let (a, b, c) = (m[0][0] * s, m[0][1] * s, m[0][2] * s);
    let (d, e, f) = (m[1][0] * s, m[1][1] * s, m[1][2] * s);
    let det = a * e - b * d;

    if det.abs() < f32::EPSILON || image.width() == 0 || image.height() == 0 {
        out.iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    let inv = [
        [e / det, -b / det, (b * f - c * e) / det],
        [-d / det, a / det, (c * d - a * f) / det],
    ];

    for v in 0..face_size {
        for u in 0..face_size {
            let (uf, vf) = (u as f32, v as f32);
            let x = inv[0][0] * uf + inv[0][1] * vf + inv[0][2];
            let y = inv[1][0] * uf + inv[1][1] * vf + inv[1][2];
            let rgb = sample_bilinear(image, x, y);
            let offset = (v * face_size + u) * 3;
            for channel in 0..3 {
                out[offset + channel] = rgb[channel] / 127.5 - 1.0;
            }
        }
    }
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let dx = x - x0;
    let dy = y - y0;

    let p00 = image.get_pixel(x0 as u32, y0 as u32);
    let p10 = image.get_pixel(x1 as u32, y0 as u32);
    let p01 = image.get_pixel(x0 as u32, y1 as u32);
    let p11 = image.get_pixel(x1 as u32, y1 as u32);

    let mut rgb = [0.0f32; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        let top = p00[channel] as f32 * (1.0 - dx) + p10[channel] as f32 * dx;
        let bottom = p01[channel] as f32 * (1.0 - dx) + p11[channel] as f32 * dx;
        *value = top * (1.0 - dy) + bottom * dy;
    }
    rgb
}
