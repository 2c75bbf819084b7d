//! # ML File Module
//!
//! Stored ML artifacts: one `MlFile` per library file and one
//! `MlLibraryData` for the whole library.

use crate::core::face::{Dimensions, Face, FileId};
use crate::core::method::VersionedMethod;
use crate::core::text::WordDetection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which rendition of a file the artifacts were computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Decoded from the original file
    Original,
    /// Decoded from a substitute rendition (converted or downscaled)
    Converted,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Original => write!(f, "Original"),
            ImageSource::Converted => write!(f, "Converted"),
        }
    }
}

/// All ML artifacts of a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlFile {
    pub file_id: FileId,
    #[serde(default)]
    pub faces: Option<Vec<Face>>,
    #[serde(default)]
    pub image_source: Option<ImageSource>,
    #[serde(default)]
    pub image_dimensions: Option<Dimensions>,
    #[serde(default)]
    pub face_detection_method: Option<VersionedMethod>,
    #[serde(default)]
    pub face_crop_method: Option<VersionedMethod>,
    #[serde(default)]
    pub face_alignment_method: Option<VersionedMethod>,
    #[serde(default)]
    pub face_embedding_method: Option<VersionedMethod>,
    #[serde(default)]
    pub text: Option<Vec<WordDetection>>,
    #[serde(default)]
    pub text_detection_method: Option<VersionedMethod>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MlFile {
    /// Empty artifact set for a file
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            faces: None,
            image_source: None,
            image_dimensions: None,
            face_detection_method: None,
            face_crop_method: None,
            face_alignment_method: None,
            face_embedding_method: None,
            text: None,
            text_detection_method: None,
            updated_at: None,
        }
    }

    /// Faces as a slice, if detection has run
    pub fn faces(&self) -> Option<&[Face]> {
        self.faces.as_deref()
    }

    /// Number of faces carrying an embedding
    pub fn embedded_face_count(&self) -> usize {
        self.faces
            .iter()
            .flatten()
            .filter(|f| f.embedding.is_some())
            .count()
    }
}

/// Cluster assignment of one embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterLabel {
    /// Member of the cluster with this id
    Cluster(u32),
    /// Not assigned to any cluster
    Noise,
}

/// Output of a clustering pass over every known embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    /// One label per input embedding, in input order
    pub labels: Vec<ClusterLabel>,
}

impl ClusteringResult {
    pub fn new(labels: Vec<ClusterLabel>) -> Self {
        Self { labels }
    }

    /// Number of distinct clusters
    pub fn cluster_count(&self) -> usize {
        self.clusters().len()
    }

    /// Input indices grouped by cluster id, ordered by id
    pub fn clusters(&self) -> Vec<Vec<usize>> {
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (index, label) in self.labels.iter().enumerate() {
            if let ClusterLabel::Cluster(id) = label {
                let id = *id as usize;
                if clusters.len() <= id {
                    clusters.resize_with(id + 1, Vec::new);
                }
                clusters[id].push(index);
            }
        }
        clusters.retain(|c| !c.is_empty());
        clusters
    }

    /// Input indices labelled as noise
    pub fn noise(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == ClusterLabel::Noise)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Library-wide ML state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MlLibraryData {
    #[serde(default)]
    pub face_clustering_results: Option<ClusteringResult>,
    #[serde(default)]
    pub face_clustering_method: Option<VersionedMethod>,
    /// Face ids in the order they were fed to the clusterer
    #[serde(default)]
    pub clustered_face_ids: Vec<String>,
    #[serde(default)]
    pub clustered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clusters_group_indices_by_label() {
        let result = ClusteringResult::new(vec![
            ClusterLabel::Cluster(1),
            ClusterLabel::Noise,
            ClusterLabel::Cluster(0),
            ClusterLabel::Cluster(1),
        ]);

        assert_eq!(result.clusters(), vec![vec![2], vec![0, 3]]);
        assert_eq!(result.noise(), vec![1]);
        assert_eq!(result.cluster_count(), 2);
    }

    #[test]
    fn new_ml_file_has_no_artifacts() {
        let file = MlFile::new(3);
        assert!(file.faces().is_none());
        assert_eq!(file.embedded_face_count(), 0);
    }

    #[test]
    fn ml_file_round_trips_through_json() {
        let mut file = MlFile::new(9);
        file.image_source = Some(ImageSource::Original);
        file.face_detection_method = Some(VersionedMethod::new("YoloFace", 1));

        let json = serde_json::to_string(&file).unwrap();
        let restored: MlFile = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, file);
    }
}
