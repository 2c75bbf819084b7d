//! Bitmap acquisition for library files.

use super::decode::FastDecoder;
use super::LoadedImage;
use crate::core::face::FileId;
use crate::core::ml_file::ImageSource;
use crate::error::ImageError;
use image::RgbImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Source of decoded bitmaps for library files
pub trait ImageReader: Send + Sync {
    /// Decode the bitmap for `file_id`
    fn read_image(&self, file_id: FileId) -> Result<LoadedImage, ImageError>;
}

/// Paths of one library file on disk
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// The original upload
    pub original: PathBuf,
    /// A converted rendition used when the original cannot be decoded
    pub converted: Option<PathBuf>,
}

/// Reads bitmaps from local files registered by id
#[derive(Default)]
pub struct LocalImageReader {
    files: RwLock<HashMap<FileId, LocalFile>>,
}

impl LocalImageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the paths of a file
    pub fn register(&self, file_id: FileId, file: LocalFile) {
        if let Ok(mut files) = self.files.write() {
            files.insert(file_id, file);
        }
    }

    fn lookup(&self, file_id: FileId) -> Result<LocalFile, ImageError> {
        let files = self
            .files
            .read()
            .map_err(|_| ImageError::UnknownFile { file_id })?;
        files
            .get(&file_id)
            .cloned()
            .ok_or(ImageError::UnknownFile { file_id })
    }
}

impl ImageReader for LocalImageReader {
    fn read_image(&self, file_id: FileId) -> Result<LoadedImage, ImageError> {
        let file = self.lookup(file_id)?;

        let (image, source) = match FastDecoder::decode(&file.original) {
            Ok(image) => (image, ImageSource::Original),
            Err(err) => match &file.converted {
                Some(converted) => {
                    warn!(file_id, error = %err, "original not decodable, using converted rendition");
                    (FastDecoder::decode(converted)?, ImageSource::Converted)
                }
                None => return Err(err),
            },
        };

        debug!(file_id, width = image.width(), height = image.height(), %source, "decoded image");
        LoadedImage::new(image.to_rgb8(), source)
    }
}

/// In-memory bitmap source
///
/// Useful for testing and for hosts that decode images themselves.
#[derive(Default)]
pub struct InMemoryImageReader {
    images: RwLock<HashMap<FileId, (RgbImage, ImageSource)>>,
    reads: AtomicUsize,
}

impl InMemoryImageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the bitmap of a file
    pub fn insert(&self, file_id: FileId, image: RgbImage, source: ImageSource) {
        if let Ok(mut images) = self.images.write() {
            images.insert(file_id, (image, source));
        }
    }

    /// Number of successful reads so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ImageReader for InMemoryImageReader {
    fn read_image(&self, file_id: FileId) -> Result<LoadedImage, ImageError> {
        let images = self
            .images
            .read()
            .map_err(|_| ImageError::UnknownFile { file_id })?;
        let (image, source) = images
            .get(&file_id)
            .cloned()
            .ok_or(ImageError::UnknownFile { file_id })?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        LoadedImage::new(image, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_png(path: &Path) {
        RgbImage::from_pixel(12, 10, Rgb([10, 20, 30])).save(path).unwrap();
    }

    #[test]
    fn unknown_file_is_error() {
        let reader = LocalImageReader::new();
        assert!(matches!(
            reader.read_image(5),
            Err(ImageError::UnknownFile { file_id: 5 })
        ));
    }

    #[test]
    fn reads_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path);

        let reader = LocalImageReader::new();
        reader.register(1, LocalFile { original: path, converted: None });

        let loaded = reader.read_image(1).unwrap();
        assert_eq!(loaded.source(), ImageSource::Original);
        assert_eq!(loaded.dimensions().width, 12);
    }

    #[test]
    fn falls_back_to_converted_rendition() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("a.heic");
        std::fs::write(&original, b"not decodable").unwrap();
        let converted = dir.path().join("a.png");
        write_png(&converted);

        let reader = LocalImageReader::new();
        reader.register(
            1,
            LocalFile {
                original,
                converted: Some(converted),
            },
        );

        assert_eq!(reader.read_image(1).unwrap().source(), ImageSource::Converted);
    }

    #[test]
    fn in_memory_reader_counts_reads() {
        let reader = InMemoryImageReader::new();
        reader.insert(3, RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])), ImageSource::Original);

        reader.read_image(3).unwrap();
        reader.read_image(3).unwrap();
        assert_eq!(reader.read_count(), 2);
    }
}
