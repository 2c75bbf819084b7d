//! Library-wide face clustering over every stored embedding.

use super::context::FacesMap;
use crate::core::config::ClusteringConfig;
use crate::core::ml_file::MlLibraryData;
use crate::core::services::FaceClusteringService;
use crate::error::ServiceError;
use crate::events::ClusteringEvent;
use chrono::Utc;
use tracing::info;

/// What a clustering pass did
#[derive(Debug, Clone, PartialEq)]
pub enum ClusteringOutcome {
    /// Too few embeddings; stored results were left alone
    Skipped {
        input_size: usize,
        min_input_size: usize,
    },
    /// New results were written into the library data
    Completed {
        input_size: usize,
        clusters: usize,
        noise: usize,
    },
}

impl ClusteringOutcome {
    pub fn event(&self) -> ClusteringEvent {
        match *self {
            ClusteringOutcome::Skipped {
                input_size,
                min_input_size,
            } => ClusteringEvent::Skipped {
                input_size,
                min_input_size,
            },
            ClusteringOutcome::Completed {
                input_size,
                clusters,
                noise,
            } => ClusteringEvent::Completed {
                input_size,
                clusters,
                noise,
            },
        }
    }
}

/// Runs a clusterer over a faces map and records the result
pub struct ClusteringStage<'a> {
    clusterer: &'a dyn FaceClusteringService,
    config: &'a ClusteringConfig,
}

impl<'a> ClusteringStage<'a> {
    pub fn new(clusterer: &'a dyn FaceClusteringService, config: &'a ClusteringConfig) -> Self {
        Self { clusterer, config }
    }

    /// Cluster every embedded face in `faces`.
    ///
    /// Faces are fed in file id order, then in their stored order within a
    /// file. `library` is only modified when clustering actually runs.
    pub fn run(
        &self,
        faces: &FacesMap,
        library: &mut MlLibraryData,
    ) -> Result<ClusteringOutcome, ServiceError> {
        let (face_ids, embeddings): (Vec<String>, Vec<_>) = faces
            .values()
            .flatten()
            .filter_map(|face| {
                face.embedding
                    .as_ref()
                    .map(|embedding| (face.id.clone(), embedding.clone()))
            })
            .unzip();

        let input_size = embeddings.len();
        if input_size < self.config.min_input_size {
            info!(
                input_size,
                min_input_size = self.config.min_input_size,
                "not enough faces to cluster"
            );
            return Ok(ClusteringOutcome::Skipped {
                input_size,
                min_input_size: self.config.min_input_size,
            });
        }

        let result = self.clusterer.cluster(&embeddings, self.config)?;
        if result.labels.len() != input_size {
            return Err(ServiceError::CountMismatch {
                stage: "clustering",
                expected: input_size,
                actual: result.labels.len(),
            });
        }

        let clusters = result.cluster_count();
        let noise = result.noise().len();
        info!(input_size, clusters, noise, method = %self.clusterer.method(), "clustered faces");

        library.face_clustering_results = Some(result);
        library.face_clustering_method = Some(self.clusterer.method());
        library.clustered_face_ids = face_ids;
        library.clustered_at = Some(Utc::now());

        Ok(ClusteringOutcome::Completed {
            input_size,
            clusters,
            noise,
        })
    }
}
