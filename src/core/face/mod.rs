//! # Face Module
//!
//! Per-face records accumulated through the sync stages.
//!
//! A `Face` is created by the detection stage and then filled in place by
//! the crop, alignment, embedding and normalization stages. Faces are never
//! re-sorted, so position `i` in a file's face list refers to the same face
//! in every stage.
//!
//! ## Coordinate Spaces
//! Detectors report pixel coordinates. Before a file's artifacts are stored,
//! detections are rewritten as fractions of the image size (`[0, 1]`).
//! [`FaceDetection::is_probably_relative`] guesses which space a detection is
//! in with the `x + width < 2` test.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Identifier of a file in the photo library
pub type FileId = u64;

/// Stable face identifier, `<file id>-<geometry hash>`
pub type FaceId = String;

/// Face embedding vector
pub type FaceEmbedding = Vec<f32>;

/// A 2D point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box, top-left corner plus size
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge
    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge
    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }

    /// Center of the box
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Pixel dimensions of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A detected face region with optional landmarks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    /// Face box
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Landmarks: left eye, right eye, nose, left and right mouth corners
    #[serde(default)]
    pub landmarks: Vec<Point>,
    /// Detector confidence
    pub probability: f32,
}

impl FaceDetection {
    /// Guess whether this detection is already in relative coordinates.
    ///
    /// Pixel boxes almost always satisfy `x + width >= 2` while relative boxes
    /// sum to at most 2. A pixel box hugging the image origin that is under
    /// two pixels wide is misclassified; callers keep this behavior.
    pub fn is_probably_relative(&self) -> bool {
        self.bbox.x + self.bbox.width < 2.0
    }

    /// Express this detection as fractions of `dimensions`
    pub fn to_relative(&self, dimensions: Dimensions) -> FaceDetection {
        let sx = 1.0 / dimensions.width.max(1) as f32;
        let sy = 1.0 / dimensions.height.max(1) as f32;
        self.scaled(sx, sy)
    }

    /// Express a relative detection in pixels of `dimensions`
    pub fn to_absolute(&self, dimensions: Dimensions) -> FaceDetection {
        self.scaled(dimensions.width as f32, dimensions.height as f32)
    }

    /// Relative form of this detection, unchanged when it already looks relative
    pub fn normalized(&self, dimensions: Dimensions) -> FaceDetection {
        if self.is_probably_relative() {
            self.clone()
        } else {
            self.to_relative(dimensions)
        }
    }

    /// Pixel coordinates of this detection, converting only when it looks relative
    pub fn in_pixels(&self, dimensions: Dimensions) -> FaceDetection {
        if self.is_probably_relative() {
            self.to_absolute(dimensions)
        } else {
            self.clone()
        }
    }

    fn scaled(&self, sx: f32, sy: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox::new(
                self.bbox.x * sx,
                self.bbox.y * sy,
                self.bbox.width * sx,
                self.bbox.height * sy,
            ),
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            probability: self.probability,
        }
    }
}

/// Affine transform mapping image pixels onto the aligned face square
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAlignment {
    /// Row-major 3x3 matrix, last row `[0, 0, 1]`
    pub affine_matrix: [[f32; 3]; 3],
    /// Face center in image pixels
    pub center: Point,
    /// Side of the aligned region in image pixels
    pub size: f32,
    /// Rotation in radians
    pub rotation: f32,
}

/// Reference to an encoded face crop stored in the blob cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceCrop {
    /// Cropped region in image pixels
    pub image_box: CropBox,
    /// Blob cache key (the face id)
    pub cache_key: String,
    /// xxh3 of the encoded crop bytes
    pub content_hash: u64,
    /// Size of the encoded crop
    pub size_bytes: usize,
}

/// Integer pixel region of a crop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A face found in a file and everything computed for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    pub file_id: FileId,
    pub detection: FaceDetection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<FaceCrop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<FaceAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<FaceEmbedding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_value: Option<f32>,
}

impl Face {
    /// Create a freshly detected face with an id derived from its geometry
    pub fn detected(file_id: FileId, detection: FaceDetection, dimensions: Dimensions) -> Self {
        Self {
            id: face_id(file_id, &detection, dimensions),
            file_id,
            detection,
            crop: None,
            alignment: None,
            embedding: None,
            blur_value: None,
        }
    }

    /// Keep only what the detection stage produced
    pub fn detection_only(&self) -> Self {
        Self {
            id: self.id.clone(),
            file_id: self.file_id,
            detection: self.detection.clone(),
            crop: None,
            alignment: None,
            embedding: None,
            blur_value: None,
        }
    }
}

/// Derive a face id from the file id and the face geometry.
///
/// The box is quantized to five decimals of the image size so that the same
/// detection on the same image yields the same id on every run.
pub fn face_id(file_id: FileId, detection: &FaceDetection, dimensions: Dimensions) -> FaceId {
    let relative = detection.normalized(dimensions);
    let clamp = |v: f32| v.clamp(0.0, 0.999_999);
    let geometry = format!(
        "{:.5}_{:.5}_{:.5}_{:.5}",
        clamp(relative.bbox.x),
        clamp(relative.bbox.y),
        clamp(relative.bbox.x_max()),
        clamp(relative.bbox.y_max()),
    );
    format!("{}-{:016x}", file_id, xxh3_64(geometry.as_bytes()))
}

/// Extract the file id prefix of a face id
pub fn file_id_of(face_id: &str) -> Option<FileId> {
    face_id.split('-').next()?.parse().ok()
}

/// Compare two face lists by id, in order.
///
/// Both absent counts as equal. A reordering counts as a change.
pub fn are_face_ids_same(a: Option<&[Face]>, b: Option<&[Face]>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: f32, y: f32, w: f32, h: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox::new(x, y, w, h),
            landmarks: vec![Point::new(x + w * 0.3, y + h * 0.4)],
            probability: 0.9,
        }
    }

    fn face(id: &str) -> Face {
        Face {
            id: id.to_string(),
            file_id: 1,
            detection: detection(10.0, 10.0, 20.0, 20.0),
            crop: None,
            alignment: None,
            embedding: None,
            blur_value: None,
        }
    }

    #[test]
    fn face_ids_both_absent_are_same() {
        assert!(are_face_ids_same(None, None));
    }

    #[test]
    fn face_ids_one_absent_differ() {
        let faces = vec![face("1-a")];
        assert!(!are_face_ids_same(Some(&faces), None));
        assert!(!are_face_ids_same(None, Some(&faces)));
    }

    #[test]
    fn face_ids_different_lengths_differ() {
        let a = vec![face("1-a")];
        let b = vec![face("1-a"), face("1-b")];
        assert!(!are_face_ids_same(Some(&a), Some(&b)));
    }

    #[test]
    fn face_ids_reordered_differ() {
        let a = vec![face("1-a"), face("1-b")];
        let b = vec![face("1-b"), face("1-a")];
        assert!(!are_face_ids_same(Some(&a), Some(&b)));
    }

    #[test]
    fn face_ids_identical_sequences_match() {
        let a = vec![face("1-a"), face("1-b")];
        let b = vec![face("1-a"), face("1-b")];
        assert!(are_face_ids_same(Some(&a), Some(&b)));
    }

    #[test]
    fn empty_face_lists_match() {
        assert!(are_face_ids_same(Some(&[]), Some(&[])));
    }

    #[test]
    fn face_id_is_deterministic() {
        let dims = Dimensions::new(640, 480);
        let d = detection(100.0, 50.0, 80.0, 90.0);
        assert_eq!(face_id(7, &d, dims), face_id(7, &d.clone(), dims));
        assert!(face_id(7, &d, dims).starts_with("7-"));
    }

    #[test]
    fn face_id_matches_for_relative_and_pixel_forms() {
        let dims = Dimensions::new(640, 480);
        let d = detection(100.0, 50.0, 80.0, 90.0);
        assert_eq!(face_id(7, &d, dims), face_id(7, &d.to_relative(dims), dims));
    }

    #[test]
    fn face_id_changes_with_geometry() {
        let dims = Dimensions::new(640, 480);
        let a = face_id(7, &detection(100.0, 50.0, 80.0, 90.0), dims);
        let b = face_id(7, &detection(300.0, 50.0, 80.0, 90.0), dims);
        assert_ne!(a, b);
    }

    #[test]
    fn file_id_prefix_parses() {
        assert_eq!(file_id_of("42-00000000deadbeef"), Some(42));
        assert_eq!(file_id_of("not-a-face"), None);
    }

    #[test]
    fn relative_conversion_is_idempotent_under_guard() {
        let dims = Dimensions::new(640, 480);
        let pixel = detection(100.0, 50.0, 80.0, 90.0);
        assert!(!pixel.is_probably_relative());

        let once = pixel.normalized(dims);
        assert!(once.is_probably_relative());
        assert_eq!(once.normalized(dims), once);
    }

    #[test]
    fn absolute_round_trip_restores_pixels() {
        let dims = Dimensions::new(200, 100);
        let pixel = detection(20.0, 10.0, 40.0, 30.0);
        let back = pixel.to_relative(dims).to_absolute(dims);
        assert!((back.bbox.x - 20.0).abs() < 1e-3);
        assert!((back.bbox.height - 30.0).abs() < 1e-3);
    }

    #[test]
    fn tiny_box_at_origin_is_misread_as_relative() {
        // Known gap of the heuristic: a sub-two-pixel box at the origin.
        let pixel = detection(0.0, 0.0, 1.5, 1.5);
        assert!(pixel.is_probably_relative());
    }

    #[test]
    fn detection_serializes_box_field() {
        let json = serde_json::to_string(&detection(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert!(json.contains("\"box\""));
    }
}
