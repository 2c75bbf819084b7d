//! # Image Module
//!
//! Bitmap acquisition and the pixel operations the stages need.
//!
//! ## Contents
//! - `reader` - `ImageReader` trait, local-file and in-memory readers
//! - `decode` - fast decoding (zune-jpeg for JPEG, image crate otherwise)
//! - `resize` - SIMD resizing via fast_image_resize
//! - `warp` - affine warping into the aligned-face buffer

pub mod decode;
mod reader;
pub mod resize;
mod warp;

pub use reader::{ImageReader, InMemoryImageReader, LocalFile, LocalImageReader};
pub use warp::{warp_affine_into, AlignedFaces};

use crate::core::face::Dimensions;
use crate::core::ml_file::ImageSource;
use crate::error::ImageError;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// A decoded bitmap and the rendition it came from.
///
/// Dropping it releases the pixel memory.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    image: RgbImage,
    source: ImageSource,
}

impl LoadedImage {
    /// Wrap a bitmap; empty images are rejected
    pub fn new(image: RgbImage, source: ImageSource) -> Result<Self, ImageError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ImageError::InvalidDimensions {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(Self { image, source })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn source(&self) -> ImageSource {
        self.source
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.image.width(), self.image.height())
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(bytes)
}
