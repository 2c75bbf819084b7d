//! The per-file face stages.
//!
//! Stages run in a fixed order: detection, crop, alignment, embedding,
//! relative normalization. Each one either copies the previous pass's
//! output forward or recomputes it for every face:
//!
//! | Stage | Reused when |
//! |-------|-------------|
//! | detection | method not stale and the stored image source is `Original` |
//! | crop | no new detection, method not stale, same face ids |
//! | alignment | no new detection, method not stale, same face ids |
//! | embedding | no new alignment, method not stale, same face ids |
//! | relative | same check as embedding |
//!
//! Faces are never re-sorted, so copying by position is safe whenever the
//! face id sequences match.

use super::context::{MlFileContext, SyncContext};
use crate::core::face::{are_face_ids_same, Face, FaceAlignment, FaceCrop, FileId};
use crate::core::image::{encode_jpeg, AlignedFaces, LoadedImage};
use crate::core::method::{is_different_or_old, VersionedMethod};
use crate::core::ml_file::{ImageSource, MlFile};
use crate::error::{MlSyncError, ServiceError};
use crate::events::{Event, StageEvent, SyncStage};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

pub(super) fn reused(ctx: &SyncContext, file_id: FileId, stage: SyncStage) {
    debug!(file_id, %stage, "reusing stored output");
    ctx.emit(Event::Stage(StageEvent::Reused { file_id, stage }));
}

pub(super) fn recomputed(ctx: &SyncContext, file_id: FileId, stage: SyncStage, count: usize) {
    debug!(file_id, %stage, count, "recomputed");
    ctx.emit(Event::Stage(StageEvent::Recomputed {
        file_id,
        stage,
        count,
    }));
}

/// Stored method of the previous pass, if any
fn stored_method(
    file: &MlFileContext,
    pick: impl Fn(&MlFile) -> Option<&VersionedMethod>,
) -> Option<VersionedMethod> {
    file.old_ml_file.as_ref().and_then(|old| pick(old).cloned())
}

/// Shared reuse test of the stages after detection
fn can_reuse(
    file: &MlFileContext,
    upstream_changed: bool,
    stored: Option<&VersionedMethod>,
    current: &VersionedMethod,
) -> bool {
    !upstream_changed
        && !is_different_or_old(stored, current)
        && are_face_ids_same(file.new_ml_file.faces(), file.old_faces())
}

/// Copy per-face fields from the previous pass, position by position
fn copy_from_old(file: &mut MlFileContext, copy: impl Fn(&mut Face, &Face)) {
    let old_faces = file.old_ml_file.as_ref().and_then(|old| old.faces.as_ref());
    if let (Some(new_faces), Some(old_faces)) = (file.new_ml_file.faces.as_mut(), old_faces) {
        for (new, old) in new_faces.iter_mut().zip(old_faces) {
            copy(new, old);
        }
    }
}

fn face_count(file: &MlFileContext) -> usize {
    file.new_ml_file.faces().map_or(0, |faces| faces.len())
}

/// Detection: find faces and assign their ids
pub fn sync_face_detections(
    ctx: &SyncContext,
    file: &mut MlFileContext,
) -> Result<(), MlSyncError> {
    let current = ctx.face_detection().method();

    if let Some(old) = file.old_ml_file.as_ref() {
        if !is_different_or_old(old.face_detection_method.as_ref(), &current)
            && old.image_source == Some(ImageSource::Original)
        {
            file.new_ml_file.faces = old
                .faces
                .as_ref()
                .map(|faces| faces.iter().map(Face::detection_only).collect());
            file.new_ml_file.image_source = old.image_source;
            file.new_ml_file.image_dimensions = old.image_dimensions;
            file.new_ml_file.face_detection_method = old.face_detection_method.clone();
            reused(ctx, file.file_id, SyncStage::Detection);
            return Ok(());
        }
    }

    file.new_ml_file.face_detection_method = Some(current);
    file.new_detection = true;

    let image = file.take_image(ctx.image_reader())?;
    let detections = ctx.face_detection().detect_faces(image.image());
    let dimensions = image.dimensions();
    file.return_image(image);

    let file_id = file.file_id;
    let faces: Vec<Face> = detections?
        .into_iter()
        .map(|detection| Face::detected(file_id, detection, dimensions))
        .collect();

    info!(file_id, faces = faces.len(), "detected faces");
    recomputed(ctx, file_id, SyncStage::Detection, faces.len());
    file.new_ml_file.faces = Some(faces);
    Ok(())
}

/// Crop: cut, encode and cache a thumbnail per face
pub fn sync_face_crops(ctx: &SyncContext, file: &mut MlFileContext) -> Result<(), MlSyncError> {
    let current = ctx.face_crop().method();
    let stored = stored_method(file, |old| old.face_crop_method.as_ref());

    if can_reuse(file, file.new_detection, stored.as_ref(), &current) {
        copy_from_old(file, |new, old| new.crop = old.crop.clone());
        file.new_ml_file.face_crop_method = stored;
        reused(ctx, file.file_id, SyncStage::Crop);
        return Ok(());
    }

    file.new_ml_file.face_crop_method = Some(current);
    let count = face_count(file);

    if count > 0 {
        let image = file.take_image(ctx.image_reader())?;
        let result = match file.new_ml_file.faces.as_mut() {
            Some(faces) => faces.iter_mut().try_for_each(|face| {
                let (crop, _) = save_face_crop(ctx, &image, face)?;
                face.crop = Some(crop);
                Ok::<(), MlSyncError>(())
            }),
            None => Ok(()),
        };
        file.return_image(image);
        result?;
    }

    recomputed(ctx, file.file_id, SyncStage::Crop, count);
    Ok(())
}

/// Crop one face out of `image`, encode it and write it to the crop cache.
///
/// Returns the crop reference and the encoded bytes.
pub(crate) fn save_face_crop(
    ctx: &SyncContext,
    image: &LoadedImage,
    face: &Face,
) -> Result<(FaceCrop, Vec<u8>), MlSyncError> {
    let config = &ctx.config().face_crop;
    let detection = face.detection.in_pixels(image.dimensions());

    let cropped = ctx
        .face_crop()
        .get_face_crop(image.image(), &detection, config)?;
    let bytes = encode_jpeg(&cropped.image, config.jpeg_quality)?;
    ctx.crop_cache().put(&face.id, &bytes)?;

    let crop = FaceCrop {
        image_box: cropped.image_box,
        cache_key: face.id.clone(),
        content_hash: xxh3_64(&bytes),
        size_bytes: bytes.len(),
    };
    Ok((crop, bytes))
}

/// Alignment: per-face transforms, the aligned-face buffer and blur scores.
///
/// The bitmap is released when this stage returns, whatever the outcome.
pub fn sync_face_alignments(
    ctx: &SyncContext,
    file: &mut MlFileContext,
) -> Result<(), MlSyncError> {
    let current = ctx.face_alignment().method();
    let stored = stored_method(file, |old| old.face_alignment_method.as_ref());

    if can_reuse(file, file.new_detection, stored.as_ref(), &current) {
        copy_from_old(file, |new, old| {
            new.alignment = old.alignment.clone();
            new.blur_value = old.blur_value;
        });
        file.new_ml_file.face_alignment_method = stored;
        reused(ctx, file.file_id, SyncStage::Alignment);
        return Ok(());
    }

    file.new_ml_file.face_alignment_method = Some(current);
    file.new_alignment = true;

    let count = face_count(file);
    if count == 0 {
        file.release_image();
        file.aligned_faces = None;
        recomputed(ctx, file.file_id, SyncStage::Alignment, 0);
        return Ok(());
    }

    let image = file.take_image(ctx.image_reader())?;
    let dimensions = image.dimensions();
    let Some(faces) = file.new_ml_file.faces.as_mut() else {
        return Ok(());
    };

    for face in faces.iter_mut() {
        let detection = face.detection.in_pixels(dimensions);
        face.alignment = Some(ctx.face_alignment().get_face_alignment(&detection));
    }

    let aligned = extract_aligned_faces(ctx, &image, faces)?;
    drop(image);

    let blur_values = ctx.blur_detection().detect_blur(&aligned, faces);
    if blur_values.len() != faces.len() {
        return Err(ServiceError::CountMismatch {
            stage: "blur detection",
            expected: faces.len(),
            actual: blur_values.len(),
        }
        .into());
    }
    for (face, blur) in faces.iter_mut().zip(blur_values) {
        face.blur_value = Some(blur);
    }

    info!(file_id = file.file_id, faces = count, "aligned faces");
    file.aligned_faces = Some(aligned);
    recomputed(ctx, file.file_id, SyncStage::Alignment, count);
    Ok(())
}

/// Warp every face's stored alignment out of `image`
fn extract_aligned_faces(
    ctx: &SyncContext,
    image: &LoadedImage,
    faces: &[Face],
) -> Result<AlignedFaces, ServiceError> {
    let alignments: Vec<&FaceAlignment> = faces
        .iter()
        .filter_map(|face| face.alignment.as_ref())
        .collect();

    if alignments.len() != faces.len() {
        return Err(ServiceError::CountMismatch {
            stage: "alignment",
            expected: faces.len(),
            actual: alignments.len(),
        });
    }

    Ok(AlignedFaces::extract(
        image.image(),
        &alignments,
        ctx.face_embedding().face_size(),
    ))
}

/// Embedding: one vector per aligned face
pub fn sync_face_embeddings(
    ctx: &SyncContext,
    file: &mut MlFileContext,
) -> Result<(), MlSyncError> {
    let current = ctx.face_embedding().method();
    let stored = stored_method(file, |old| old.face_embedding_method.as_ref());

    if can_reuse(file, file.new_alignment, stored.as_ref(), &current) {
        copy_from_old(file, |new, old| new.embedding = old.embedding.clone());
        file.new_ml_file.face_embedding_method = stored;
        reused(ctx, file.file_id, SyncStage::Embedding);
        return Ok(());
    }

    file.new_ml_file.face_embedding_method = Some(current);

    let count = face_count(file);
    if count == 0 {
        file.aligned_faces = None;
        recomputed(ctx, file.file_id, SyncStage::Embedding, 0);
        return Ok(());
    }

    let aligned = match file.aligned_faces.take() {
        Some(aligned) => aligned,
        None => {
            debug!(file_id = file.file_id, "re-extracting aligned faces from stored alignments");
            let image = file.take_image(ctx.image_reader())?;
            let faces = file.new_ml_file.faces().unwrap_or_default();
            extract_aligned_faces(ctx, &image, faces)?
        }
    };

    let embeddings = ctx.face_embedding().get_face_embeddings(&aligned)?;
    if embeddings.len() != count {
        return Err(ServiceError::CountMismatch {
            stage: "embedding",
            expected: count,
            actual: embeddings.len(),
        }
        .into());
    }

    if let Some(faces) = file.new_ml_file.faces.as_mut() {
        for (face, embedding) in faces.iter_mut().zip(embeddings) {
            face.embedding = Some(embedding);
        }
    }

    file.new_embedding = true;
    info!(file_id = file.file_id, faces = count, "computed embeddings");
    recomputed(ctx, file.file_id, SyncStage::Embedding, count);
    Ok(())
}

/// Relative normalization: rewrite pixel detections as image fractions.
///
/// Detections that already look relative are left alone, so running this
/// twice is the same as running it once.
pub fn sync_relative_detections(
    ctx: &SyncContext,
    file: &mut MlFileContext,
) -> Result<(), MlSyncError> {
    let current = ctx.face_embedding().method();
    let stored = stored_method(file, |old| old.face_embedding_method.as_ref());

    if can_reuse(file, file.new_alignment, stored.as_ref(), &current) {
        reused(ctx, file.file_id, SyncStage::Relative);
        return Ok(());
    }

    let file_id = file.file_id;
    let dimensions = file.new_ml_file.image_dimensions;
    let mut converted = 0;

    if let Some(faces) = file.new_ml_file.faces.as_mut() {
        for face in faces.iter_mut() {
            if face.detection.is_probably_relative() {
                continue;
            }
            let dimensions =
                dimensions.ok_or(ServiceError::MissingImageDimensions { file_id })?;
            face.detection = ctx
                .face_detection()
                .get_relative_detection(&face.detection, dimensions);
            converted += 1;
        }
    }

    recomputed(ctx, file_id, SyncStage::Relative, converted);
    Ok(())
}
