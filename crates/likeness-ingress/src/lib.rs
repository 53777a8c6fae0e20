//! Image ingress: turn a transport-encoded image into pixels, and
//! materialize it on disk for extractors that only accept file paths.

mod decode;
mod scratch;

pub use decode::{decode_base64, decode_bytes, DecodedImage};
pub use scratch::ScratchFile;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("no image provided")]
    EmptyPayload,
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image dimensions are zero")]
    ZeroDimensions,
    #[error("failed to encode scratch image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("scratch file I/O error: {0}")]
    Scratch(#[from] std::io::Error),
}
