//! Integration tests for text detection admission and queueing.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use photo_ml_sync::core::config::TextDetectionConfig;
use photo_ml_sync::core::face::BoundingBox;
use photo_ml_sync::core::queue::CancellationToken;
use photo_ml_sync::core::text::{
    TextDetectionOutcome, TextDetectionService, TextDetector, TextTicket, WordDetection,
};
use photo_ml_sync::core::VersionedMethod;
use photo_ml_sync::error::DetectorError;
use predicates::prelude::*;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Records the size of every image it sees and returns fixed words
struct RecordingDetector {
    seen: Arc<Mutex<Vec<(u32, u32)>>>,
    delay: Duration,
}

impl TextDetector for RecordingDetector {
    fn detect(
        &mut self,
        image: &RgbImage,
        _token: &CancellationToken,
    ) -> Result<Vec<WordDetection>, DetectorError> {
        self.seen.lock().unwrap().push(image.dimensions());
        thread::sleep(self.delay);
        Ok(vec![
            word("invoice", 96.0),
            word("total", 75.0),
            word("smudge", 31.5),
        ])
    }
}

fn word(text: &str, confidence: f32) -> WordDetection {
    WordDetection {
        text: text.to_string(),
        bbox: BoundingBox::new(4.0, 4.0, 40.0, 12.0),
        confidence,
    }
}

fn service(
    config: TextDetectionConfig,
    delay: Duration,
) -> (TextDetectionService, Arc<Mutex<Vec<(u32, u32)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let service = TextDetectionService::new(VersionedMethod::new("Tesseract", 1), config, move || {
        Ok(RecordingDetector {
            seen: recorder.clone(),
            delay,
        })
    })
    .unwrap();
    (service, seen)
}

fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

#[test]
fn small_images_are_skipped_with_reason() {
    let (service, seen) = service(TextDetectionConfig::default(), Duration::ZERO);

    let outcome = service
        .detect_text_image(&RgbImage::new(40, 30), CancellationToken::new())
        .unwrap();

    match outcome {
        TextDetectionOutcome::Skipped { reason } => {
            assert!(predicate::str::contains("too small").eval(&reason));
        }
        other => panic!("expected skip, got {:?}", other),
    }
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(service.queue_stats().submitted, 0);
}

#[test]
fn unsupported_format_is_skipped_before_decoding() {
    let (service, _seen) = service(TextDetectionConfig::default(), Duration::ZERO);

    let outcome = service
        .detect_text(b"GIF89a\x10\x00\x10\x00\x00\x00\x00;", CancellationToken::new())
        .unwrap();

    match outcome {
        TextDetectionOutcome::Skipped { reason } => {
            assert!(predicate::str::contains("unsupported").eval(&reason));
        }
        other => panic!("expected skip, got {:?}", other),
    }
}

#[test]
fn encoded_png_is_detected_and_filtered() {
    let (service, seen) = service(TextDetectionConfig::default(), Duration::ZERO);
    let bytes = encode(
        RgbImage::from_pixel(120, 60, Rgb([250, 250, 250])),
        ImageFormat::Png,
    );

    let outcome = service.detect_text(&bytes, CancellationToken::new()).unwrap();

    assert_eq!(
        outcome,
        TextDetectionOutcome::Words(vec![word("invoice", 96.0), word("total", 75.0)])
    );
    assert_eq!(*seen.lock().unwrap(), vec![(120, 60)]);
}

#[test]
fn large_images_are_downscaled_into_a_square() {
    let (service, seen) = service(TextDetectionConfig::default(), Duration::ZERO);

    service
        .detect_text_image(&RgbImage::new(2000, 1000), CancellationToken::new())
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(720, 360)]);
}

#[test]
fn queued_tickets_resolve_in_order() {
    let (service, seen) = service(TextDetectionConfig::default(), Duration::from_millis(10));

    let tickets: Vec<TextTicket> = [100u32, 110, 120]
        .iter()
        .map(|&width| {
            service
                .queue_text_detection(&RgbImage::new(width, 50), CancellationToken::new())
                .unwrap()
        })
        .collect();

    for ticket in tickets {
        assert!(matches!(ticket.wait(), Ok(TextDetectionOutcome::Words(_))));
    }
    assert_eq!(*seen.lock().unwrap(), vec![(100, 50), (110, 50), (120, 50)]);
}

#[test]
fn cancelled_request_is_not_an_error() {
    let (service, _seen) = service(TextDetectionConfig::default(), Duration::from_millis(200));

    let busy = service
        .queue_text_detection(&RgbImage::new(100, 50), CancellationToken::new())
        .unwrap();
    let token = CancellationToken::new();
    let waiting = service
        .queue_text_detection(&RgbImage::new(100, 50), token.clone())
        .unwrap();
    token.cancel();

    assert_eq!(waiting.wait().unwrap(), TextDetectionOutcome::Cancelled);
    assert!(busy.wait().is_ok());
}

#[test]
fn timeout_is_an_error_and_detector_is_rebuilt() {
    let config = TextDetectionConfig {
        timeout_secs: 1,
        ..TextDetectionConfig::default()
    };
    let (service, _seen) = service(config, Duration::from_millis(1500));
    let image = RgbImage::new(100, 50);

    let err = service
        .detect_text_image(&image, CancellationToken::new())
        .unwrap_err();
    assert_eq!(
        err,
        DetectorError::TimedOut {
            after: Duration::from_secs(1)
        }
    );
    assert_eq!(service.queue_stats().initializations, 1);

    // The next request runs on a fresh detector, and times out again.
    let _ = service.detect_text_image(&image, CancellationToken::new());
    assert_eq!(service.queue_stats().initializations, 2);
}
