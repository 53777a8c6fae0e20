//! Decision core for face verification and two-frame liveness.
//!
//! Everything here is a pure function of its inputs: descriptors and face
//! boxes go in, verdicts come out. Detection, decoding and transport live in
//! the sibling crates.

pub mod descriptor;
pub mod distance;
pub mod engine;
pub mod movement;
pub mod strategy;

pub use descriptor::{
    DetectionResult, FaceBox, FaceDescriptor, FaceDetection, StrategyKind, UnknownStrategy,
};
pub use distance::{distance, DistanceError, MetricKind};
pub use engine::{DecisionError, Frame, LivenessVerdict, MatchVerdict, VerificationEngine};
pub use movement::{movement, LivenessBand};
pub use strategy::{ConfidenceScale, MetricStrategy};
