//! # Text Module
//!
//! OCR word detection behind a single-flight queue.
//!
//! ## Admission
//! Before anything is queued an image must:
//! - be PNG, JPEG, BMP or PNM (when given as encoded bytes)
//! - have a longer side of at least `min_width` and a shorter side of at
//!   least `min_height`
//!
//! Images whose shorter side exceeds `max_dimension` are downscaled to fit a
//! `max_dimension` square first. Rejections are `Skipped` outcomes, not
//! errors.

use crate::core::config::TextDetectionConfig;
use crate::core::face::BoundingBox;
use crate::core::image::decode::FastDecoder;
use crate::core::image::resize::resize_to_square;
use crate::core::method::VersionedMethod;
use crate::core::queue::{CancellationToken, JobOutcome, QueueStats, SingleFlightQueue, Ticket};
use crate::error::{DetectorError, MlSyncError};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A recognized word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordDetection {
    pub text: String,
    /// Word region in pixels of the image the detector saw
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Recognition confidence, 0-100
    pub confidence: f32,
}

/// An OCR engine instance.
///
/// Lives on the queue's executor thread; `detect` may block for a long
/// time and should check `token` when it can.
pub trait TextDetector {
    fn detect(
        &mut self,
        image: &RgbImage,
        token: &CancellationToken,
    ) -> Result<Vec<WordDetection>, DetectorError>;
}

/// Result of a text detection request
#[derive(Debug, Clone, PartialEq)]
pub enum TextDetectionOutcome {
    /// Words at or above the confidence threshold
    Words(Vec<WordDetection>),
    /// The image was not admitted
    Skipped { reason: String },
    /// The request was cancelled
    Cancelled,
}

/// A queued or already-rejected text detection request
pub enum TextTicket {
    Skipped { reason: String },
    Pending {
        ticket: Ticket<Vec<WordDetection>>,
        min_accuracy: f32,
        timeout: Duration,
    },
}

impl TextTicket {
    /// Cancel the request if it is still pending
    pub fn cancel(&self) {
        if let TextTicket::Pending { ticket, .. } = self {
            ticket.cancel();
        }
    }

    /// Block until the request resolves.
    ///
    /// Timeouts and detector failures are errors; the caller decides whether
    /// that fails the file.
    pub fn wait(self) -> Result<TextDetectionOutcome, DetectorError> {
        match self {
            TextTicket::Skipped { reason } => Ok(TextDetectionOutcome::Skipped { reason }),
            TextTicket::Pending {
                ticket,
                min_accuracy,
                timeout,
            } => match ticket.wait() {
                JobOutcome::Completed(mut words) => {
                    words.retain(|w| w.confidence >= min_accuracy);
                    Ok(TextDetectionOutcome::Words(words))
                }
                JobOutcome::Cancelled => Ok(TextDetectionOutcome::Cancelled),
                JobOutcome::TimedOut => Err(DetectorError::TimedOut { after: timeout }),
                JobOutcome::Failed(err) => Err(err),
            },
        }
    }
}

type BoxedTextDetector = Box<dyn TextDetector>;

/// Text detection front end: admission checks, the queue and the
/// confidence filter
pub struct TextDetectionService {
    method: VersionedMethod,
    config: TextDetectionConfig,
    queue: SingleFlightQueue<BoxedTextDetector, Vec<WordDetection>>,
}

impl TextDetectionService {
    /// Build the service; `factory` runs lazily on the detector thread
    pub fn new<D, F>(
        method: VersionedMethod,
        config: TextDetectionConfig,
        factory: F,
    ) -> Result<Self, DetectorError>
    where
        D: TextDetector + 'static,
        F: Fn() -> Result<D, DetectorError> + Send + Sync + 'static,
    {
        let queue = SingleFlightQueue::new("text-detection", config.timeout(), move || {
            factory().map(|detector| Box::new(detector) as BoxedTextDetector)
        })?;

        Ok(Self {
            method,
            config,
            queue,
        })
    }

    pub fn method(&self) -> VersionedMethod {
        self.method.clone()
    }

    pub fn config(&self) -> &TextDetectionConfig {
        &self.config
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Check encoded bytes, decode them and detect text
    pub fn detect_text(
        &self,
        bytes: &[u8],
        token: CancellationToken,
    ) -> Result<TextDetectionOutcome, MlSyncError> {
        if let Some(reason) = Self::unsupported_format(bytes) {
            info!(%reason, "skipping text detection");
            return Ok(TextDetectionOutcome::Skipped { reason });
        }

        let image = FastDecoder::decode_bytes(bytes, Path::new("<text-detection>"))?.to_rgb8();
        Ok(self.detect_text_image(&image, token)?)
    }

    /// Detect text in a decoded bitmap, blocking until the queue answers
    pub fn detect_text_image(
        &self,
        image: &RgbImage,
        token: CancellationToken,
    ) -> Result<TextDetectionOutcome, DetectorError> {
        self.queue_text_detection(image, token)?.wait()
    }

    /// Admit and enqueue a bitmap without waiting for the result
    pub fn queue_text_detection(
        &self,
        image: &RgbImage,
        token: CancellationToken,
    ) -> Result<TextTicket, DetectorError> {
        let prepared = match self.prepare(image)? {
            Ok(prepared) => prepared,
            Err(reason) => {
                info!(%reason, "skipping text detection");
                return Ok(TextTicket::Skipped { reason });
            }
        };

        debug!(
            width = prepared.width(),
            height = prepared.height(),
            "queueing text detection"
        );
        let ticket = self
            .queue
            .submit(token, move |detector, token| detector.detect(&prepared, token));

        Ok(TextTicket::Pending {
            ticket,
            min_accuracy: self.config.min_accuracy,
            timeout: self.queue.timeout(),
        })
    }

    /// Apply the size rules: the inner `Err` is a skip reason
    fn prepare(&self, image: &RgbImage) -> Result<Result<RgbImage, String>, DetectorError> {
        let (width, height) = image.dimensions();
        let long_side = width.max(height);
        let short_side = width.min(height);

        if long_side < self.config.min_width || short_side < self.config.min_height {
            return Ok(Err(format!(
                "image too small for text detection ({}x{})",
                long_side, short_side
            )));
        }

        if short_side > self.config.max_dimension {
            debug!(width, height, "downscaling image for text detection");
            let resized = resize_to_square(image, self.config.max_dimension)
                .map_err(|e| DetectorError::Failed(e.to_string()))?;
            return Ok(Ok(resized));
        }

        Ok(Ok(image.clone()))
    }

    /// Skip reason for bytes that are not an admitted raster format
    fn unsupported_format(bytes: &[u8]) -> Option<String> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Pnm) => None,
            Ok(format) => Some(format!("unsupported file type {:?}", format)),
            Err(_) => Some("unrecognized file type".to_string()),
        }
    }
}
