//! # Config Module
//!
//! Tunables for the sync stages, loadable from JSON.
//!
//! ## Example
//! ```rust,ignore
//! let config = SyncConfig::from_json_file(Path::new("ml-sync.json"))?;
//! assert_eq!(config.text_detection.max_dimension, 720);
//! ```

use crate::error::MlSyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub face_crop: FaceCropConfig,
    pub face_clustering: ClusteringConfig,
    pub text_detection: TextDetectionConfig,
}

impl SyncConfig {
    /// Load a configuration file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, MlSyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MlSyncError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self, MlSyncError> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| MlSyncError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<(), MlSyncError> {
        if self.face_crop.max_size == 0 {
            return Err(MlSyncError::Config("face_crop.max_size must be > 0".into()));
        }
        if !(1..=100).contains(&self.face_crop.jpeg_quality) {
            return Err(MlSyncError::Config(
                "face_crop.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.face_clustering.epsilon <= 0.0 {
            return Err(MlSyncError::Config(
                "face_clustering.epsilon must be > 0".into(),
            ));
        }
        if self.text_detection.max_dimension == 0 {
            return Err(MlSyncError::Config(
                "text_detection.max_dimension must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Face crop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceCropConfig {
    /// Extra margin around the face box, as a fraction of the box size
    pub padding: f32,
    /// Longest side of a stored crop in pixels
    pub max_size: u32,
    /// JPEG quality of stored crops (1-100)
    pub jpeg_quality: u8,
}

impl Default for FaceCropConfig {
    fn default() -> Self {
        Self {
            padding: 0.25,
            max_size: 256,
            jpeg_quality: 80,
        }
    }
}

/// Face clustering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Clustering is skipped when fewer embeddings are known
    pub min_input_size: usize,
    /// Minimum neighbourhood size (including the point) for a core point
    pub min_cluster_size: usize,
    /// Neighbourhood radius, euclidean distance on unit-length embeddings
    pub epsilon: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_input_size: 50,
            min_cluster_size: 5,
            epsilon: 0.6,
        }
    }
}

/// Text detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDetectionConfig {
    /// Minimum length of the longer image side
    pub min_width: u32,
    /// Minimum length of the shorter image side
    pub min_height: u32,
    /// Images whose shorter side exceeds this are downscaled
    pub max_dimension: u32,
    /// Words below this confidence (0-100) are dropped
    pub min_accuracy: f32,
    /// Per-request bound before the detector is torn down
    pub timeout_secs: u64,
}

impl TextDetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TextDetectionConfig {
    fn default() -> Self {
        Self {
            min_width: 44,
            min_height: 20,
            max_dimension: 720,
            min_accuracy: 75.0,
            timeout_secs: 10,
        }
    }
}
