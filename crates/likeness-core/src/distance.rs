//! Descriptor dissimilarity.
//!
//! Two metrics are supported and a deployment uses exactly one of them:
//! Euclidean (L2) distance for embedding-style descriptors and cosine
//! distance for histogram-style descriptors. Lower is always more similar.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// `sqrt(sum((a_i - b_i)^2))`, unbounded above.
    L2,
    /// `1 - (a.b) / (|a| |b|)`, in `[0, 2]`.
    Cosine,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("descriptor dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("invalid descriptor: {0}")]
    InvalidVector(&'static str),
}

/// Compute the dissimilarity of two descriptors under `metric`.
///
/// Both inputs must come from the same extractor strategy; that is the
/// caller's contract and is not checked here.
pub fn distance(a: &[f32], b: &[f32], metric: MetricKind) -> Result<f32, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    validate(a)?;
    validate(b)?;

    match metric {
        MetricKind::L2 => l2_distance(a, b),
        MetricKind::Cosine => cosine_distance(a, b),
    }
}

fn validate(v: &[f32]) -> Result<(), DistanceError> {
    if v.is_empty() {
        return Err(DistanceError::InvalidVector("empty vector"));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(DistanceError::InvalidVector("non-finite component (NaN/Inf)"));
    }
    Ok(())
}

fn l2_distance(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    // Accumulate in f64 so large 512-d embeddings keep precision.
    let d = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32;
    if !d.is_finite() {
        return Err(DistanceError::InvalidVector("distance overflows f32"));
    }
    Ok(d)
}

fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, DistanceError> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(DistanceError::InvalidVector("zero-norm vector has no direction"));
    }
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Ok((1.0 - similarity) as f32)
}
