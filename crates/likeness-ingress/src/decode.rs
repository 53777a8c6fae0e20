use base64::{engine::general_purpose::STANDARD, Engine};
use image::RgbImage;

use crate::scratch::ScratchFile;
use crate::IngressError;

/// A decoded RGB8 image owned by a single request.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    rgb: RgbImage,
}

impl DecodedImage {
    pub fn from_rgb(rgb: RgbImage) -> Result<Self, IngressError> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(IngressError::ZeroDimensions);
        }
        Ok(Self { rgb })
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Write the image to a temporary JPEG that is deleted when the returned
    /// guard is dropped.
    pub fn materialize(&self) -> Result<ScratchFile, IngressError> {
        ScratchFile::write_jpeg(&self.rgb)
    }
}

/// Decode a base64 image, with or without a `data:image/...;base64,` prefix.
pub fn decode_base64(payload: &str) -> Result<DecodedImage, IngressError> {
    let payload = payload.trim();
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    // Line-wrapped payloads are common from browser canvases and mail clients.
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(IngressError::EmptyPayload);
    }

    let bytes = STANDARD.decode(compact.as_bytes())?;
    decode_bytes(&bytes)
}

/// Decode raw image bytes in any format the `image` crate recognises.
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage, IngressError> {
    if bytes.is_empty() {
        return Err(IngressError::EmptyPayload);
    }
    let img = image::load_from_memory(bytes).map_err(IngressError::Decode)?;
    tracing::trace!(
        width = img.width(),
        height = img.height(),
        color = ?img.color(),
        "image decoded"
    );
    DecodedImage::from_rgb(img.into_rgb8())
}
