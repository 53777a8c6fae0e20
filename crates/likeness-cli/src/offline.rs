//! Offline `detect` / `verify` / `liveness` on local image files, using the
//! same extractors and decision core as the daemon.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use likeness_core::{DetectionResult, MetricStrategy, StrategyKind, VerificationEngine};
use likeness_extract::{BoxFormat, CommandExtractor, DescriptorExtractor, OnnxExtractor};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(ClapArgs, Debug)]
pub struct BackendArgs {
    /// Descriptor strategy (arcface, facenet, dlib, histogram)
    #[arg(long, default_value = "arcface")]
    pub strategy: StrategyKind,
    /// Model directory for the ONNX backend
    #[arg(long)]
    pub model_dir: Option<PathBuf>,
    /// Use an external extractor program instead of the ONNX models
    #[arg(long)]
    pub command: Option<String>,
    /// Argument passed to the extractor program (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Array box encoding of the extractor's output (xywh or trbl)
    #[arg(long, default_value = "xywh")]
    pub box_format: BoxFormat,
}

#[derive(ClapArgs, Debug)]
pub struct PolicyArgs {
    /// Override the strategy's same-person threshold
    #[arg(long)]
    pub threshold: Option<f32>,
}

impl BackendArgs {
    fn extractor(&self) -> Result<Box<dyn DescriptorExtractor>> {
        match &self.command {
            Some(program) => Ok(Box::new(CommandExtractor::new(
                program.clone(),
                self.args.clone(),
                self.box_format,
                self.strategy,
            ))),
            None => {
                anyhow::ensure!(
                    self.strategy == StrategyKind::ArcFace,
                    "the ONNX backend only produces arcface descriptors; pass --command for '{}'",
                    self.strategy
                );
                let dir = self
                    .model_dir
                    .clone()
                    .unwrap_or_else(likeness_models::default_model_dir);
                let extractor = OnnxExtractor::load(&dir)
                    .with_context(|| format!("failed to load models from {}", dir.display()))?;
                Ok(Box::new(extractor))
            }
        }
    }
}

fn extract_file(extractor: &mut dyn DescriptorExtractor, path: &Path) -> Result<DetectionResult> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = likeness_ingress::decode_bytes(&bytes)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let result = extractor
        .extract(&image)
        .with_context(|| format!("extraction failed for {}", path.display()))?;
    tracing::info!(path = %path.display(), faces = result.len(), "image processed");
    Ok(result)
}

fn decision(backend: &BackendArgs, policy: &PolicyArgs, liveness: bool) -> VerificationEngine {
    let mut strategy = MetricStrategy::preset(backend.strategy);
    if let Some(t) = policy.threshold {
        if liveness {
            strategy.liveness_threshold = t;
        } else {
            strategy.verify_threshold = t;
        }
    }
    VerificationEngine::new(strategy)
}

pub fn detect(image: &Path, backend: &BackendArgs) -> Result<()> {
    let mut extractor = backend.extractor()?;
    let result = extract_file(extractor.as_mut(), image)?;
    let faces = result.len();
    let output = match result.into_primary() {
        Some(face) => json!({
            "faceDetected": true,
            "faces": faces,
            "faceBox": face.bbox,
            "score": face.score,
            "faceDescriptor": face.descriptor.values(),
        }),
        None => json!({ "faceDetected": false, "faces": 0 }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn verify(a: &Path, b: &Path, backend: &BackendArgs, policy: &PolicyArgs) -> Result<()> {
    let mut extractor = backend.extractor()?;
    let first = extract_file(extractor.as_mut(), a)?;
    let second = extract_file(extractor.as_mut(), b)?;
    let verdict = decision(backend, policy, false).verify_detections(&first, &second)?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

pub fn liveness(a: &Path, b: &Path, backend: &BackendArgs, policy: &PolicyArgs) -> Result<()> {
    let mut extractor = backend.extractor()?;
    let first = extract_file(extractor.as_mut(), a)?;
    let second = extract_file(extractor.as_mut(), b)?;
    let verdict = decision(backend, policy, true).check_liveness_detections(&first, &second)?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
