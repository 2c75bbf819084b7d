//! # Method Module
//!
//! Identifies which algorithm produced a stored artifact.
//!
//! Every stage records the `VersionedMethod` of the collaborator that
//! produced its output. On the next sync the stored method is compared with
//! the current one to decide whether the output can be reused.

use serde::{Deserialize, Serialize};

/// A `(name, version)` pair identifying the algorithm behind an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedMethod {
    /// Algorithm name, e.g. `"YoloFace"` or `"Tesseract"`
    pub name: String,
    /// Monotonic version of the algorithm
    pub version: u32,
}

impl VersionedMethod {
    /// Create a new versioned method
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for VersionedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Decide whether a stored artifact must be recomputed.
///
/// Returns `true` when nothing was stored, when the stored method has a
/// different name, or when its version is older than `current`. A stored
/// version newer than `current` is not stale: stages never downgrade.
pub fn is_different_or_old(stored: Option<&VersionedMethod>, current: &VersionedMethod) -> bool {
    match stored {
        None => true,
        Some(stored) => stored.name != current.name || stored.version < current.version,
    }
}
