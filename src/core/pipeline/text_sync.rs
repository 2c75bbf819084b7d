//! Text stage: OCR words of a file.
//!
//! Runs before the face stages so a freshly read bitmap can be shared with
//! them. Without a text service, or when the request is cancelled, the
//! previous pass's words are carried forward unchanged.

use super::context::{MlFileContext, SyncContext};
use super::face_sync::{recomputed, reused};
use crate::core::method::is_different_or_old;
use crate::core::text::TextDetectionOutcome;
use crate::error::MlSyncError;
use crate::events::SyncStage;
use tracing::{debug, info};

pub fn sync_text(ctx: &SyncContext, file: &mut MlFileContext) -> Result<(), MlSyncError> {
    let Some(service) = ctx.text_detection() else {
        carry_old_text(file);
        return Ok(());
    };

    let current = service.method();
    let stored = file
        .old_ml_file
        .as_ref()
        .and_then(|old| old.text_detection_method.as_ref());
    if !is_different_or_old(stored, &current) {
        carry_old_text(file);
        reused(ctx, file.file_id, SyncStage::Text);
        return Ok(());
    }

    let image = file.take_image(ctx.image_reader())?;
    let outcome = service.detect_text_image(image.image(), ctx.cancellation_token().clone());
    file.return_image(image);

    match outcome? {
        TextDetectionOutcome::Words(words) => {
            info!(file_id = file.file_id, words = words.len(), "detected text");
            recomputed(ctx, file.file_id, SyncStage::Text, words.len());
            file.new_ml_file.text = Some(words);
            file.new_ml_file.text_detection_method = Some(current);
        }
        TextDetectionOutcome::Skipped { reason } => {
            debug!(file_id = file.file_id, %reason, "text detection skipped");
            recomputed(ctx, file.file_id, SyncStage::Text, 0);
            file.new_ml_file.text = Some(Vec::new());
            file.new_ml_file.text_detection_method = Some(current);
        }
        TextDetectionOutcome::Cancelled => {
            debug!(file_id = file.file_id, "text detection cancelled");
            carry_old_text(file);
        }
    }
    Ok(())
}

fn carry_old_text(file: &mut MlFileContext) {
    if let Some(old) = file.old_ml_file.as_ref() {
        file.new_ml_file.text = old.text.clone();
        file.new_ml_file.text_detection_method = old.text_detection_method.clone();
    }
}
