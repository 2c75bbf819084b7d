//! Pipeline execution implementation.

use super::clustering::{ClusteringOutcome, ClusteringStage};
use super::context::{MlFileContext, SyncContext};
use super::face_sync::{
    save_face_crop, sync_face_alignments, sync_face_crops, sync_face_detections,
    sync_face_embeddings, sync_relative_detections,
};
use super::text_sync::sync_text;
use crate::core::face::{file_id_of, FileId};
use crate::core::method::is_different_or_old;
use crate::core::ml_file::{ClusteringResult, MlFile};
use crate::error::{FaceError, MlSyncError};
use crate::events::{Event, FileEvent, PipelineEvent, SyncPhase, SyncProgress, SyncSummary};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// A file whose sync failed; its stored artifacts were left untouched
#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub file_id: FileId,
    pub message: String,
}

/// Result of a sync run
#[derive(Debug)]
pub struct SyncRunResult {
    /// Files whose artifacts were written
    pub synced: Vec<FileId>,
    /// Files that failed (non-fatal)
    pub failed: Vec<FileFailure>,
    /// New clustering result, when clustering ran and passed its guard
    pub clustering: Option<ClusteringResult>,
    /// Faces across the synced files
    pub faces: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Outcome of a single file's stages
#[derive(Debug)]
pub struct FileSyncOutcome {
    /// The artifacts that were written
    pub ml_file: MlFile,
    /// Embeddings were recomputed, so the clustering corpus changed
    pub new_embedding: bool,
}

/// The incremental ML sync pipeline
pub struct MlSyncPipeline {
    context: SyncContext,
}

impl MlSyncPipeline {
    pub fn new(context: SyncContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Sync every file in order, then re-cluster if anything changed.
    ///
    /// A failing file is reported and skipped. Errors of the clustering
    /// phase abort the run.
    pub fn run(&self, file_ids: &[FileId]) -> Result<SyncRunResult, MlSyncError> {
        let start_time = Instant::now();
        let ctx = &self.context;
        let total = file_ids.len();

        ctx.emit(Event::Pipeline(PipelineEvent::Started {
            run_id: ctx.run_id().to_string(),
            total_files: total,
        }));
        ctx.emit(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: SyncPhase::Files,
        }));
        info!(run_id = %ctx.run_id(), files = total, "starting sync run");

        let mut synced = Vec::new();
        let mut failed = Vec::new();
        let mut faces = 0;
        let mut embeddings_changed = false;

        for (index, &file_id) in file_ids.iter().enumerate() {
            match self.sync_file(file_id) {
                Ok(outcome) => {
                    faces += outcome.ml_file.faces().map_or(0, |f| f.len());
                    embeddings_changed |= outcome.new_embedding;
                    synced.push(file_id);
                }
                Err(e) => {
                    warn!(file_id, error = %e, "file sync failed");
                    ctx.emit(Event::File(FileEvent::Failed {
                        file_id,
                        message: e.to_string(),
                    }));
                    failed.push(FileFailure {
                        file_id,
                        message: e.to_string(),
                    });
                }
            }

            ctx.emit(Event::Pipeline(PipelineEvent::Progress(SyncProgress {
                completed: index + 1,
                total,
                current_file: file_id,
            })));
        }

        let library = ctx.ml_library_data()?;
        let clustering_stale = is_different_or_old(
            library.face_clustering_method.as_ref(),
            &ctx.face_clustering().method(),
        );

        let clustering = if embeddings_changed || clustering_stale {
            self.run_clustering()?
        } else {
            debug!("no embedding changes, clustering is up to date");
            None
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let summary = SyncSummary {
            total_files: total,
            synced: synced.len(),
            failed: failed.len(),
            faces,
            clusters: clustering.as_ref().map(|c| c.cluster_count()),
            duration_ms,
        };
        info!(
            synced = summary.synced,
            failed = summary.failed,
            faces,
            duration_ms,
            "sync run complete"
        );
        ctx.emit(Event::Pipeline(PipelineEvent::Completed { summary }));

        Ok(SyncRunResult {
            synced,
            failed,
            clustering,
            faces,
            duration_ms,
        })
    }

    /// Run every stage for one file and persist the result.
    ///
    /// Nothing is written unless all stages succeed.
    pub fn sync_file(&self, file_id: FileId) -> Result<FileSyncOutcome, MlSyncError> {
        let ctx = &self.context;
        let span = info_span!("sync_file", file_id, run_id = %ctx.run_id());
        let _enter = span.enter();

        ctx.emit(Event::File(FileEvent::Started { file_id }));

        let old = ctx.store().get_ml_file(file_id)?;
        let mut file = MlFileContext::new(file_id, old);

        sync_text(ctx, &mut file)?;
        sync_face_detections(ctx, &mut file)?;
        sync_face_crops(ctx, &mut file)?;
        sync_face_alignments(ctx, &mut file)?;
        sync_face_embeddings(ctx, &mut file)?;
        sync_relative_detections(ctx, &mut file)?;
        file.release_image();

        let MlFileContext {
            mut new_ml_file,
            new_embedding,
            ..
        } = file;
        new_ml_file.updated_at = Some(Utc::now());

        ctx.store().put_ml_file(&new_ml_file)?;
        ctx.record_synced_faces(&new_ml_file)?;

        let face_count = new_ml_file.faces().map_or(0, |f| f.len());
        ctx.emit(Event::File(FileEvent::Synced {
            file_id,
            face_count,
        }));
        debug!(faces = face_count, new_embedding, "file synced");

        Ok(FileSyncOutcome {
            ml_file: new_ml_file,
            new_embedding,
        })
    }

    /// Cluster every synced face and store the result.
    ///
    /// Returns `None` when the corpus is below the configured minimum; the
    /// stored result is then left as it was.
    pub fn run_clustering(&self) -> Result<Option<ClusteringResult>, MlSyncError> {
        let ctx = &self.context;
        ctx.emit(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: SyncPhase::Clustering,
        }));

        let faces = ctx.all_synced_faces()?;
        let mut library = ctx.ml_library_data()?;
        let outcome = ClusteringStage::new(ctx.face_clustering(), &ctx.config().face_clustering)
            .run(&faces, &mut library)?;

        ctx.emit(Event::Clustering(outcome.event()));
        match outcome {
            ClusteringOutcome::Skipped { .. } => Ok(None),
            ClusteringOutcome::Completed { .. } => {
                let result = library.face_clustering_results.clone();
                ctx.set_ml_library_data(library)?;
                Ok(result)
            }
        }
    }

    /// Re-crop a stored face and overwrite its cached crop.
    ///
    /// Returns the encoded crop bytes. The stored crop reference is updated
    /// to match.
    pub fn regenerate_face_crop(&self, face_id: &str) -> Result<Vec<u8>, MlSyncError> {
        let ctx = &self.context;
        let file_id = file_id_of(face_id).ok_or_else(|| FaceError::InvalidId {
            face_id: face_id.to_string(),
        })?;

        let face = ctx
            .store()
            .get_face(file_id, face_id)?
            .ok_or_else(|| FaceError::NotFound {
                face_id: face_id.to_string(),
            })?;

        let image = ctx.image_reader().read_image(file_id)?;
        let (crop, bytes) = save_face_crop(ctx, &image, &face)?;
        info!(face_id, size = bytes.len(), "regenerated face crop");

        if let Some(mut ml_file) = ctx.store().get_ml_file(file_id)? {
            if let Some(stored) = ml_file
                .faces
                .as_mut()
                .and_then(|faces| faces.iter_mut().find(|f| f.id == face_id))
            {
                stored.crop = Some(crop);
                ctx.store().put_ml_file(&ml_file)?;
                ctx.record_synced_faces(&ml_file)?;
            }
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::{BoundingBox, FaceDetection, FaceEmbedding, Point};
    use crate::core::image::{AlignedFaces, InMemoryImageReader};
    use crate::core::method::VersionedMethod;
    use crate::core::ml_file::ImageSource;
    use crate::core::services::{FaceDetectionService, FaceEmbeddingService};
    use crate::core::store::{InMemoryMlStore, MlStore};
    use crate::error::ServiceError;
    use crate::events::{ClusteringEvent, EventChannel};
    use image::{Rgb, RgbImage};
    use std::sync::Arc;

    struct TwoFaces;

    impl FaceDetectionService for TwoFaces {
        fn method(&self) -> VersionedMethod {
            VersionedMethod::new("TwoFaces", 1)
        }

        fn detect_faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, ServiceError> {
            if image.width() < 40 {
                return Err(ServiceError::Detection("image too narrow".to_string()));
            }
            Ok([4.0f32, 24.0]
                .iter()
                .map(|&x| FaceDetection {
                    bbox: BoundingBox::new(x, 4.0, 12.0, 12.0),
                    landmarks: vec![
                        Point::new(x + 3.0, 8.0),
                        Point::new(x + 9.0, 8.0),
                        Point::new(x + 6.0, 10.0),
                        Point::new(x + 4.0, 13.0),
                        Point::new(x + 8.0, 13.0),
                    ],
                    probability: 0.9,
                })
                .collect())
        }
    }

    struct UnitEmbedder;

    impl FaceEmbeddingService for UnitEmbedder {
        fn method(&self) -> VersionedMethod {
            VersionedMethod::new("Unit", 1)
        }

        fn face_size(&self) -> usize {
            8
        }

        fn get_face_embeddings(
            &self,
            faces: &AlignedFaces,
        ) -> Result<Vec<FaceEmbedding>, ServiceError> {
            Ok(vec![vec![0.0, 1.0]; faces.len()])
        }
    }

    fn pipeline(store: Arc<InMemoryMlStore>) -> (MlSyncPipeline, crate::events::EventReceiver) {
        let reader = Arc::new(InMemoryImageReader::new());
        reader.insert(1, RgbImage::from_pixel(48, 24, Rgb([90, 120, 150])), ImageSource::Original);
        reader.insert(2, RgbImage::from_pixel(20, 20, Rgb([0, 0, 0])), ImageSource::Original);

        let (sender, receiver) = EventChannel::new();
        let context = SyncContext::builder()
            .face_detection(Arc::new(TwoFaces))
            .face_embedding(Arc::new(UnitEmbedder))
            .image_reader(reader)
            .store(store)
            .events(sender)
            .build()
            .unwrap();
        (MlSyncPipeline::new(context), receiver)
    }

    #[test]
    fn failed_file_is_reported_and_not_written() {
        let store = Arc::new(InMemoryMlStore::new());
        let (pipeline, events) = pipeline(store.clone());

        let result = pipeline.run(&[1, 2]).unwrap();

        assert_eq!(result.synced, vec![1]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].file_id, 2);
        assert!(store.get_ml_file(2).unwrap().is_none());
        assert_eq!(result.faces, 2);

        let events = events.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::File(FileEvent::Failed { file_id: 2, .. })
        )));
        assert!(matches!(
            events.last(),
            Some(Event::Pipeline(PipelineEvent::Completed { .. }))
        ));
    }

    #[test]
    fn small_corpus_skips_clustering() {
        let store = Arc::new(InMemoryMlStore::new());
        let (pipeline, events) = pipeline(store.clone());

        let result = pipeline.run(&[1]).unwrap();

        assert!(result.clustering.is_none());
        assert_eq!(store.get_library_data().unwrap().face_clustering_results, None);
        assert!(events.drain().iter().any(|e| matches!(
            e,
            Event::Clustering(ClusteringEvent::Skipped {
                input_size: 2,
                min_input_size: 50
            })
        )));
    }

    #[test]
    fn regenerate_rejects_malformed_id() {
        let (pipeline, _events) = pipeline(Arc::new(InMemoryMlStore::new()));

        let err = pipeline.regenerate_face_crop("not-a-face").unwrap_err();

        assert!(matches!(err, MlSyncError::Face(FaceError::InvalidId { .. })));
    }

    #[test]
    fn regenerate_overwrites_cached_crop() {
        let store = Arc::new(InMemoryMlStore::new());
        let (pipeline, _events) = pipeline(store.clone());
        pipeline.run(&[1]).unwrap();

        let face_id = store.get_ml_file(1).unwrap().unwrap().faces.unwrap()[0]
            .id
            .clone();
        let bytes = pipeline.regenerate_face_crop(&face_id).unwrap();

        assert_eq!(
            pipeline.context().crop_cache().get(&face_id).unwrap(),
            Some(bytes)
        );
    }
}
