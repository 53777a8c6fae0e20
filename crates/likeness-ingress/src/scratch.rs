use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::IngressError;

const JPEG_QUALITY: u8 = 95;

/// On-disk copy of a decoded image, removed when dropped.
///
/// Holding the guard for the duration of an extractor call releases the file
/// on every exit path, including early returns and panics that unwind.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    pub(crate) fn write_jpeg(rgb: &RgbImage) -> Result<Self, IngressError> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
            .encode_image(rgb)
            .map_err(IngressError::Encode)?;

        let mut file = tempfile::Builder::new()
            .prefix("likeness-")
            .suffix(".jpg")
            .tempfile()?;
        file.write_all(&encoded)?;
        file.flush()?;

        tracing::trace!(
            path = %file.path().display(),
            bytes = encoded.len(),
            "scratch image written"
        );
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        tracing::trace!(path = %self.file.path().display(), "releasing scratch image");
    }
}
