//! In-process SCRFD + ArcFace pipeline on ONNX Runtime.

mod detector;
mod recognizer;

pub use detector::{DetectedFace, ScrfdDetector};
pub use recognizer::ArcFaceRecognizer;

use likeness_core::{DetectionResult, FaceBox, FaceDescriptor, FaceDetection, StrategyKind};
use likeness_ingress::DecodedImage;
use likeness_models::{model_for, ModelRole};
use std::path::Path;

use crate::{DescriptorExtractor, ExtractError};

/// Detector and recognizer sessions, loaded once and reused for every image.
pub struct OnnxExtractor {
    detector: ScrfdDetector,
    recognizer: ArcFaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let det_path = model_for(ModelRole::Detector).path_in(model_dir);
        let detector = ScrfdDetector::load(&det_path)?;
        tracing::info!(path = %det_path.display(), "SCRFD detector loaded");

        let rec_path = model_for(ModelRole::Recognizer).path_in(model_dir);
        let recognizer = ArcFaceRecognizer::load(&rec_path)?;
        tracing::info!(path = %rec_path.display(), "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn strategy(&self) -> StrategyKind {
        StrategyKind::ArcFace
    }

    fn extract(&mut self, image: &DecodedImage) -> Result<DetectionResult, ExtractError> {
        let rgb = image.rgb();
        let detected = self.detector.detect(rgb)?;

        let mut faces = Vec::with_capacity(detected.len());
        for face in &detected {
            let values = self.recognizer.extract(rgb, face)?;
            faces.push(FaceDetection {
                bbox: to_face_box(face),
                descriptor: FaceDescriptor::new(values, StrategyKind::ArcFace),
                score: Some(face.score),
            });
        }
        Ok(DetectionResult::new(faces))
    }
}

fn to_face_box(face: &DetectedFace) -> FaceBox {
    let x = face.x1.round().max(0.0) as u32;
    let y = face.y1.round().max(0.0) as u32;
    let x2 = face.x2.round().max(0.0) as u32;
    let y2 = face.y2.round().max(0.0) as u32;
    FaceBox::new(x, y, x2.saturating_sub(x), y2.saturating_sub(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reports_missing_detector_first() {
        let dir = std::env::temp_dir().join("likeness-onnx-no-models");
        match OnnxExtractor::load(&dir) {
            Err(ExtractError::ModelMissing(path)) => {
                assert!(path.ends_with("det_10g.onnx"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loaded models from an empty directory"),
        }
    }

    #[test]
    fn corner_box_rounds_to_pixels() {
        let face = DetectedFace {
            x1: 10.4,
            y1: 19.6,
            x2: 90.5,
            y2: 120.2,
            score: 0.8,
        };
        assert_eq!(to_face_box(&face), FaceBox::new(10, 20, 81, 100));
    }
}
