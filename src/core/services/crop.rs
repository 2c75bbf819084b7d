//! Padded square face cropping.

use super::traits::{FaceCropImage, FaceCropService};
use crate::core::config::FaceCropConfig;
use crate::core::face::{CropBox, FaceDetection};
use crate::core::image::resize::FastResizer;
use crate::core::method::VersionedMethod;
use crate::error::ServiceError;
use image::{imageops, RgbImage};

/// Crops a padded square around each face and bounds its size
#[derive(Debug, Default, Clone)]
pub struct ImageFaceCropper;

impl ImageFaceCropper {
    pub fn new() -> Self {
        Self
    }

    /// Square region around `detection`, clamped to the image
    pub fn crop_box(
        detection: &FaceDetection,
        padding: f32,
        image_width: u32,
        image_height: u32,
    ) -> Option<CropBox> {
        let bbox = &detection.bbox;
        let side = bbox.width.max(bbox.height) * (1.0 + 2.0 * padding.max(0.0));
        let center = bbox.center();

        let x0 = (center.x - side / 2.0).floor().max(0.0);
        let y0 = (center.y - side / 2.0).floor().max(0.0);
        let x1 = (center.x + side / 2.0).ceil().min(image_width as f32);
        let y1 = (center.y + side / 2.0).ceil().min(image_height as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(CropBox {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

impl FaceCropService for ImageFaceCropper {
    fn method(&self) -> VersionedMethod {
        VersionedMethod::new("ArcFace", 1)
    }

    fn get_face_crop(
        &self,
        image: &RgbImage,
        detection: &FaceDetection,
        config: &FaceCropConfig,
    ) -> Result<FaceCropImage, ServiceError> {
        let image_box = Self::crop_box(detection, config.padding, image.width(), image.height())
            .ok_or_else(|| {
                ServiceError::Crop(format!(
                    "face box {:?} lies outside the {}x{} image",
                    detection.bbox,
                    image.width(),
                    image.height()
                ))
            })?;

        let cropped =
            imageops::crop_imm(image, image_box.x, image_box.y, image_box.width, image_box.height)
                .to_image();

        let cropped = FastResizer::new()
            .fit_within(&cropped, config.max_size)
            .map_err(|e| ServiceError::Crop(e.to_string()))?;

        Ok(FaceCropImage {
            image: cropped,
            image_box,
        })
    }
}
