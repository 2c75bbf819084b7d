//! Event type definitions for progress reporting.

use crate::core::face::FileId;
use serde::{Deserialize, Serialize};

/// All events emitted by a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Run-level events
    Pipeline(PipelineEvent),
    /// Per-file events
    File(FileEvent),
    /// Reuse-or-recompute decisions of the per-file stages
    Stage(StageEvent),
    /// Library-wide clustering events
    Clustering(ClusteringEvent),
}

/// Run-level events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A run has started
    Started { run_id: String, total_files: usize },
    /// Moving to a new phase
    PhaseChanged { phase: SyncPhase },
    /// A file finished, successfully or not
    Progress(SyncProgress),
    /// The run completed
    Completed { summary: SyncSummary },
}

/// Phases of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Per-file stages
    Files,
    /// Library-wide clustering
    Clustering,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Files => write!(f, "Syncing files"),
            SyncPhase::Clustering => write!(f, "Clustering faces"),
        }
    }
}

/// Progress through the files of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Files processed so far
    pub completed: usize,
    /// Files in this run
    pub total: usize,
    /// File that just finished
    pub current_file: FileId,
}

/// Per-file events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileEvent {
    /// Stages are starting for a file
    Started { file_id: FileId },
    /// Artifacts of the file were written
    Synced { file_id: FileId, face_count: usize },
    /// The file failed; its stored artifacts are untouched
    Failed { file_id: FileId, message: String },
}

/// Per-file stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStage {
    Text,
    Detection,
    Crop,
    Alignment,
    Embedding,
    /// Detections rewritten as image fractions
    Relative,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStage::Text => write!(f, "text"),
            SyncStage::Detection => write!(f, "detection"),
            SyncStage::Crop => write!(f, "crop"),
            SyncStage::Alignment => write!(f, "alignment"),
            SyncStage::Embedding => write!(f, "embedding"),
            SyncStage::Relative => write!(f, "relative"),
        }
    }
}

/// What a stage did for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageEvent {
    /// Prior output was copied forward
    Reused { file_id: FileId, stage: SyncStage },
    /// Output was computed for `count` items
    Recomputed {
        file_id: FileId,
        stage: SyncStage,
        count: usize,
    },
}

/// Clustering events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusteringEvent {
    /// Too few embeddings; the stored result was left alone
    Skipped {
        input_size: usize,
        min_input_size: usize,
    },
    /// A new result was stored
    Completed {
        input_size: usize,
        clusters: usize,
        noise: usize,
    },
}

/// Summary of a sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Files requested
    pub total_files: usize,
    /// Files whose artifacts were written
    pub synced: usize,
    /// Files that failed
    pub failed: usize,
    /// Faces across the synced files
    pub faces: usize,
    /// Clusters in the new clustering result, if clustering ran
    pub clusters: Option<usize>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_serializable() {
        let event = Event::Stage(StageEvent::Recomputed {
            file_id: 12,
            stage: SyncStage::Embedding,
            count: 3,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(SyncStage::Alignment.to_string(), "alignment");
        assert_eq!(SyncStage::Relative.to_string(), "relative");
    }

    #[test]
    fn summary_is_serializable() {
        let summary = SyncSummary {
            total_files: 10,
            synced: 9,
            failed: 1,
            faces: 31,
            clusters: Some(4),
            duration_ms: 5000,
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"faces\":31"));
    }
}
