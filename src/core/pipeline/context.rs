//! Run-scoped and file-scoped sync state.

use crate::core::cache::{BlobCache, InMemoryBlobCache};
use crate::core::config::SyncConfig;
use crate::core::face::{Face, FileId};
use crate::core::image::{AlignedFaces, ImageReader, LoadedImage};
use crate::core::ml_file::{MlFile, MlLibraryData};
use crate::core::queue::CancellationToken;
use crate::core::services::{
    BlurDetectionService, DbscanClusterer, FaceAlignmentService, FaceClusteringService,
    FaceCropService, FaceDetectionService, FaceEmbeddingService, ImageFaceCropper,
    LaplacianBlurDetector, SimilarityFaceAligner,
};
use crate::core::store::{InMemoryMlStore, MlStore};
use crate::core::text::TextDetectionService;
use crate::error::{ImageError, MlSyncError, StorageError};
use crate::events::{null_sender, Event, EventSender};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Faces of every synced file, keyed by file id
pub type FacesMap = BTreeMap<FileId, Vec<Face>>;

/// Everything a sync run needs: collaborators, storage, config and the
/// library-wide caches.
///
/// One context per run. The all-faces cache and the library data are
/// loaded from the store on first use and live as long as the context.
pub struct SyncContext {
    run_id: Uuid,
    face_detection: Arc<dyn FaceDetectionService>,
    face_crop: Arc<dyn FaceCropService>,
    face_alignment: Arc<dyn FaceAlignmentService>,
    face_embedding: Arc<dyn FaceEmbeddingService>,
    blur_detection: Arc<dyn BlurDetectionService>,
    face_clustering: Arc<dyn FaceClusteringService>,
    text_detection: Option<Arc<TextDetectionService>>,
    image_reader: Arc<dyn ImageReader>,
    store: Arc<dyn MlStore>,
    crop_cache: Arc<dyn BlobCache>,
    config: SyncConfig,
    events: EventSender,
    cancel: CancellationToken,
    all_synced_faces: Mutex<Option<Arc<FacesMap>>>,
    ml_library_data: Mutex<Option<MlLibraryData>>,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn face_detection(&self) -> &dyn FaceDetectionService {
        self.face_detection.as_ref()
    }

    pub fn face_crop(&self) -> &dyn FaceCropService {
        self.face_crop.as_ref()
    }

    pub fn face_alignment(&self) -> &dyn FaceAlignmentService {
        self.face_alignment.as_ref()
    }

    pub fn face_embedding(&self) -> &dyn FaceEmbeddingService {
        self.face_embedding.as_ref()
    }

    pub fn blur_detection(&self) -> &dyn BlurDetectionService {
        self.blur_detection.as_ref()
    }

    pub fn face_clustering(&self) -> &dyn FaceClusteringService {
        self.face_clustering.as_ref()
    }

    pub fn text_detection(&self) -> Option<&TextDetectionService> {
        self.text_detection.as_deref()
    }

    pub fn image_reader(&self) -> &dyn ImageReader {
        self.image_reader.as_ref()
    }

    pub fn store(&self) -> &dyn MlStore {
        self.store.as_ref()
    }

    pub fn crop_cache(&self) -> &dyn BlobCache {
        self.crop_cache.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.send(event);
    }

    /// Token passed to queued detector requests of this run
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel pending and in-flight detector requests of this run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Faces of every synced file, loaded from the store at most once
    pub fn all_synced_faces(&self) -> Result<Arc<FacesMap>, StorageError> {
        let mut cached = self.lock(&self.all_synced_faces)?;
        if let Some(faces) = cached.as_ref() {
            return Ok(faces.clone());
        }

        let faces = Arc::new(self.store.get_all_faces_map()?);
        debug!(run_id = %self.run_id, files = faces.len(), "loaded all synced faces");
        *cached = Some(faces.clone());
        Ok(faces)
    }

    /// Keep an already-loaded faces cache in step with a newly written file
    pub(crate) fn record_synced_faces(&self, file: &MlFile) -> Result<(), StorageError> {
        let mut cached = self.lock(&self.all_synced_faces)?;
        if let (Some(map), Some(faces)) = (cached.as_mut(), file.faces.as_ref()) {
            Arc::make_mut(map).insert(file.file_id, faces.clone());
        }
        Ok(())
    }

    /// Library-wide ML data, loaded from the store on first use
    pub fn ml_library_data(&self) -> Result<MlLibraryData, StorageError> {
        let mut cached = self.lock(&self.ml_library_data)?;
        if let Some(data) = cached.as_ref() {
            return Ok(data.clone());
        }

        let data = self.store.get_library_data()?;
        *cached = Some(data.clone());
        Ok(data)
    }

    /// Persist new library data and refresh the in-context copy
    pub(crate) fn set_ml_library_data(&self, data: MlLibraryData) -> Result<(), StorageError> {
        let mut cached = self.lock(&self.ml_library_data)?;
        self.store.put_library_data(&data)?;
        *cached = Some(data);
        Ok(())
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, StorageError> {
        mutex.lock().map_err(|_| StorageError::Corrupted {
            path: PathBuf::from(format!("sync-context:{}", self.run_id)),
        })
    }
}

/// Builder for a [`SyncContext`].
///
/// Face detection, face embedding and an image reader are required. Crop,
/// alignment, blur and clustering default to the built-in services; the
/// store and crop cache default to in-memory backends.
#[derive(Default)]
pub struct SyncContextBuilder {
    face_detection: Option<Arc<dyn FaceDetectionService>>,
    face_crop: Option<Arc<dyn FaceCropService>>,
    face_alignment: Option<Arc<dyn FaceAlignmentService>>,
    face_embedding: Option<Arc<dyn FaceEmbeddingService>>,
    blur_detection: Option<Arc<dyn BlurDetectionService>>,
    face_clustering: Option<Arc<dyn FaceClusteringService>>,
    text_detection: Option<Arc<TextDetectionService>>,
    image_reader: Option<Arc<dyn ImageReader>>,
    store: Option<Arc<dyn MlStore>>,
    crop_cache: Option<Arc<dyn BlobCache>>,
    config: SyncConfig,
    events: Option<EventSender>,
}

impl SyncContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn face_detection(mut self, service: Arc<dyn FaceDetectionService>) -> Self {
        self.face_detection = Some(service);
        self
    }

    pub fn face_crop(mut self, service: Arc<dyn FaceCropService>) -> Self {
        self.face_crop = Some(service);
        self
    }

    pub fn face_alignment(mut self, service: Arc<dyn FaceAlignmentService>) -> Self {
        self.face_alignment = Some(service);
        self
    }

    pub fn face_embedding(mut self, service: Arc<dyn FaceEmbeddingService>) -> Self {
        self.face_embedding = Some(service);
        self
    }

    pub fn blur_detection(mut self, service: Arc<dyn BlurDetectionService>) -> Self {
        self.blur_detection = Some(service);
        self
    }

    pub fn face_clustering(mut self, service: Arc<dyn FaceClusteringService>) -> Self {
        self.face_clustering = Some(service);
        self
    }

    /// Enable the text stage
    pub fn text_detection(mut self, service: Arc<TextDetectionService>) -> Self {
        self.text_detection = Some(service);
        self
    }

    pub fn image_reader(mut self, reader: Arc<dyn ImageReader>) -> Self {
        self.image_reader = Some(reader);
        self
    }

    pub fn store(mut self, store: Arc<dyn MlStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn crop_cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.crop_cache = Some(cache);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the context
    pub fn build(self) -> Result<SyncContext, MlSyncError> {
        self.config.validate()?;

        let face_detection = self
            .face_detection
            .ok_or_else(|| MlSyncError::Config("a face detection service is required".into()))?;
        let face_embedding = self
            .face_embedding
            .ok_or_else(|| MlSyncError::Config("a face embedding service is required".into()))?;
        let image_reader = self
            .image_reader
            .ok_or_else(|| MlSyncError::Config("an image reader is required".into()))?;

        Ok(SyncContext {
            run_id: Uuid::new_v4(),
            face_detection,
            face_crop: self
                .face_crop
                .unwrap_or_else(|| Arc::new(ImageFaceCropper::new())),
            face_alignment: self
                .face_alignment
                .unwrap_or_else(|| Arc::new(SimilarityFaceAligner::new())),
            face_embedding,
            blur_detection: self
                .blur_detection
                .unwrap_or_else(|| Arc::new(LaplacianBlurDetector::new())),
            face_clustering: self
                .face_clustering
                .unwrap_or_else(|| Arc::new(DbscanClusterer::new())),
            text_detection: self.text_detection,
            image_reader,
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryMlStore::new())),
            crop_cache: self
                .crop_cache
                .unwrap_or_else(|| Arc::new(InMemoryBlobCache::new())),
            config: self.config,
            events: self.events.unwrap_or_else(null_sender),
            cancel: CancellationToken::new(),
            all_synced_faces: Mutex::new(None),
            ml_library_data: Mutex::new(None),
        })
    }
}

/// Per-file sync state: the stored artifacts, the artifacts being built and
/// the flags stages hand to each other.
pub struct MlFileContext {
    pub file_id: FileId,
    pub old_ml_file: Option<MlFile>,
    pub new_ml_file: MlFile,
    /// Detection ran this pass
    pub new_detection: bool,
    /// Alignment ran this pass
    pub new_alignment: bool,
    /// Embeddings were computed this pass
    pub new_embedding: bool,
    /// Aligned faces produced by the alignment stage this pass
    pub aligned_faces: Option<AlignedFaces>,
    image: Option<LoadedImage>,
}

impl MlFileContext {
    pub fn new(file_id: FileId, old_ml_file: Option<MlFile>) -> Self {
        Self {
            file_id,
            old_ml_file,
            new_ml_file: MlFile::new(file_id),
            new_detection: false,
            new_alignment: false,
            new_embedding: false,
            aligned_faces: None,
            image: None,
        }
    }

    /// Faces of the previous pass
    pub fn old_faces(&self) -> Option<&[Face]> {
        self.old_ml_file.as_ref().and_then(|f| f.faces())
    }

    /// Whether the bitmap is currently held
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Take the bitmap out of the context, reading it if not held yet.
    ///
    /// Reading records the image source and dimensions on the new artifacts.
    /// Put it back with [`MlFileContext::return_image`] to share it with
    /// later stages; dropping it releases the pixels.
    pub fn take_image(&mut self, reader: &dyn ImageReader) -> Result<LoadedImage, ImageError> {
        if let Some(image) = self.image.take() {
            return Ok(image);
        }

        let image = reader.read_image(self.file_id)?;
        self.new_ml_file.image_source = Some(image.source());
        self.new_ml_file.image_dimensions = Some(image.dimensions());
        Ok(image)
    }

    /// Hand a bitmap back for later stages
    pub fn return_image(&mut self, image: LoadedImage) {
        self.image = Some(image);
    }

    /// Release the bitmap, if held
    pub fn release_image(&mut self) {
        self.image = None;
    }
}
