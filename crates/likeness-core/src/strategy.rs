use serde::{Deserialize, Serialize};

use crate::descriptor::StrategyKind;
use crate::distance::MetricKind;
use crate::movement::LivenessBand;

/// How `confidence` is derived from a raw distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// `1 - distance`; meaningful for metrics on a roughly `[0, 1]` scale.
    OneMinusDistance,
    /// The raw distance itself, for unbounded metrics. Not clamped.
    RawDistance,
}

/// Metric, thresholds and liveness band for one deployed extractor.
///
/// Threshold meaning follows the metric:
/// - [`MetricKind::L2`]: maximum distance, same person iff `distance < threshold`.
/// - [`MetricKind::Cosine`]: minimum similarity, same person iff
///   `1 - distance > threshold`.
///
/// `liveness_threshold` is the same-person cutoff used inside a liveness
/// check and is normally looser than `verify_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStrategy {
    pub kind: StrategyKind,
    pub metric: MetricKind,
    pub verify_threshold: f32,
    pub liveness_threshold: f32,
    pub band: LivenessBand,
    pub confidence: ConfidenceScale,
}

impl MetricStrategy {
    /// Deployment defaults for each known extractor.
    pub fn preset(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::ArcFace => Self {
                kind,
                metric: MetricKind::Cosine,
                verify_threshold: 0.40,
                liveness_threshold: 0.30,
                band: LivenessBand::bounded(2.0, 100.0),
                confidence: ConfidenceScale::OneMinusDistance,
            },
            StrategyKind::Facenet => Self {
                kind,
                metric: MetricKind::L2,
                verify_threshold: 10.0,
                liveness_threshold: 10.0,
                band: LivenessBand::lower_bound_only(2.0),
                confidence: ConfidenceScale::RawDistance,
            },
            StrategyKind::Dlib => Self {
                kind,
                metric: MetricKind::L2,
                verify_threshold: 0.6,
                liveness_threshold: 0.6,
                band: LivenessBand::bounded(3.0, 100.0),
                confidence: ConfidenceScale::OneMinusDistance,
            },
            StrategyKind::Histogram => Self {
                kind,
                metric: MetricKind::Cosine,
                verify_threshold: 0.7,
                liveness_threshold: 0.6,
                band: LivenessBand::bounded(1.0, 100.0),
                confidence: ConfidenceScale::OneMinusDistance,
            },
        }
    }

    /// Apply the metric's strict same-person comparator.
    pub fn is_same_person(&self, distance: f32, threshold: f32) -> bool {
        match self.metric {
            MetricKind::L2 => distance < threshold,
            MetricKind::Cosine => 1.0 - distance > threshold,
        }
    }

    pub fn confidence(&self, distance: f32) -> f32 {
        match self.confidence {
            ConfidenceScale::OneMinusDistance => 1.0 - distance,
            ConfidenceScale::RawDistance => distance,
        }
    }
}
