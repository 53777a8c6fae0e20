//! Descriptor extraction backends.
//!
//! The decision core never calls detection or encoding internals; it consumes
//! a [`DetectionResult`]. Each backend here turns a decoded image into one.

pub mod command;
pub mod onnx;

pub use command::{BoxFormat, CommandExtractor};
pub use onnx::OnnxExtractor;

use likeness_core::{DetectionResult, StrategyKind};
use likeness_ingress::{DecodedImage, IngressError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error("model runtime error: {0}")]
    Model(#[from] ort::Error),
    #[error("model file missing: {0}")]
    ModelMissing(PathBuf),
    #[error("unexpected model output: {0}")]
    ModelOutput(String),
    #[error("failed to start extractor '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting on extractor '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extractor '{program}' did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("extractor exited with status {status}: {stderr}")]
    Command { status: i32, stderr: String },
    #[error("malformed extractor output: {0}")]
    Protocol(String),
}

/// A face detection + description capability.
///
/// Implementations are constructed once at startup and owned by a single
/// engine thread for their whole lifetime, hence `&mut self` and `Send`.
pub trait DescriptorExtractor: Send {
    /// Strategy tag stamped on every descriptor this extractor produces.
    fn strategy(&self) -> StrategyKind;

    /// Detect faces and describe each one. No face is `Ok` with an empty result.
    fn extract(&mut self, image: &DecodedImage) -> Result<DetectionResult, ExtractError>;
}

impl<T: DescriptorExtractor + ?Sized> DescriptorExtractor for Box<T> {
    fn strategy(&self) -> StrategyKind {
        (**self).strategy()
    }

    fn extract(&mut self, image: &DecodedImage) -> Result<DetectionResult, ExtractError> {
        (**self).extract(image)
    }
}
