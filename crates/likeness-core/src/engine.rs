use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::descriptor::{DetectionResult, FaceBox, FaceDescriptor, FaceDetection};
use crate::distance::{distance, DistanceError};
use crate::movement::movement;
use crate::strategy::MetricStrategy;

/// Outcome of comparing two descriptors.
///
/// `matched` is derived from `distance` and the strategy threshold only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchVerdict {
    #[serde(rename = "match")]
    pub matched: bool,
    pub distance: f32,
    pub confidence: f32,
}

/// Outcome of a two-frame liveness check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessVerdict {
    pub is_live: bool,
    pub movement: f32,
    pub same_person: bool,
    pub distance: f32,
    /// Descriptor of the second frame, for registration once liveness passes.
    #[serde(rename = "faceDescriptor", serialize_with = "descriptor_values")]
    pub descriptor: FaceDescriptor,
}

fn descriptor_values<S: Serializer>(d: &FaceDescriptor, s: S) -> Result<S::Ok, S::Error> {
    d.values().serialize(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    First,
    Second,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Second => f.write_str("second"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("no face descriptor available for the {0} image")]
    NoDescriptor(Frame),
    #[error(transparent)]
    Distance(#[from] DistanceError),
}

/// Stateless verify/liveness decisions for one deployed strategy.
///
/// Holds only immutable configuration; every call is independent.
#[derive(Debug, Clone, Copy)]
pub struct VerificationEngine {
    strategy: MetricStrategy,
}

impl VerificationEngine {
    pub fn new(strategy: MetricStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &MetricStrategy {
        &self.strategy
    }

    /// Decide whether two descriptors belong to the same person.
    pub fn verify(
        &self,
        d1: &FaceDescriptor,
        d2: &FaceDescriptor,
    ) -> Result<MatchVerdict, DistanceError> {
        let s = &self.strategy;
        let dist = distance(d1.values(), d2.values(), s.metric)?;
        let verdict = MatchVerdict {
            matched: s.is_same_person(dist, s.verify_threshold),
            distance: dist,
            confidence: s.confidence(dist),
        };
        tracing::debug!(
            metric = s.metric.as_str(),
            distance = dist,
            threshold = s.verify_threshold,
            matched = verdict.matched,
            "verify decision"
        );
        Ok(verdict)
    }

    /// Decide whether two frames show the same live subject.
    ///
    /// Live iff the descriptors agree under the liveness cutoff and the box
    /// movement falls strictly inside the configured band.
    pub fn check_liveness(
        &self,
        box1: &FaceBox,
        d1: &FaceDescriptor,
        box2: &FaceBox,
        d2: &FaceDescriptor,
    ) -> Result<LivenessVerdict, DistanceError> {
        let s = &self.strategy;
        let moved = movement(box1, box2);
        let dist = distance(d1.values(), d2.values(), s.metric)?;
        let same_person = s.is_same_person(dist, s.liveness_threshold);
        let is_live = same_person && s.band.contains(moved);

        tracing::debug!(
            metric = s.metric.as_str(),
            distance = dist,
            movement = moved,
            same_person,
            is_live,
            "liveness decision"
        );

        Ok(LivenessVerdict {
            is_live,
            movement: moved,
            same_person,
            distance: dist,
            descriptor: d2.clone(),
        })
    }

    /// [`verify`](Self::verify) on the primary face of each detection.
    pub fn verify_detections(
        &self,
        first: &DetectionResult,
        second: &DetectionResult,
    ) -> Result<MatchVerdict, DecisionError> {
        let (a, b) = primaries(first, second)?;
        Ok(self.verify(&a.descriptor, &b.descriptor)?)
    }

    /// [`check_liveness`](Self::check_liveness) on the primary face of each detection.
    pub fn check_liveness_detections(
        &self,
        first: &DetectionResult,
        second: &DetectionResult,
    ) -> Result<LivenessVerdict, DecisionError> {
        let (a, b) = primaries(first, second)?;
        Ok(self.check_liveness(&a.bbox, &a.descriptor, &b.bbox, &b.descriptor)?)
    }
}

fn primaries<'a>(
    first: &'a DetectionResult,
    second: &'a DetectionResult,
) -> Result<(&'a FaceDetection, &'a FaceDetection), DecisionError> {
    let a = first
        .primary()
        .ok_or(DecisionError::NoDescriptor(Frame::First))?;
    let b = second
        .primary()
        .ok_or(DecisionError::NoDescriptor(Frame::Second))?;
    Ok((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StrategyKind;
    use crate::distance::MetricKind;
    use crate::movement::LivenessBand;
    use crate::strategy::ConfidenceScale;

    fn l2_strategy(band: LivenessBand) -> MetricStrategy {
        MetricStrategy {
            kind: StrategyKind::Dlib,
            metric: MetricKind::L2,
            verify_threshold: 0.6,
            liveness_threshold: 0.6,
            band,
            confidence: ConfidenceScale::OneMinusDistance,
        }
    }

    fn desc(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec(), StrategyKind::Dlib)
    }

    fn detection(bbox: FaceBox, values: &[f32]) -> FaceDetection {
        FaceDetection {
            bbox,
            descriptor: desc(values),
            score: Some(0.9),
        }
    }

    #[test]
    fn identical_zero_descriptors_match() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let v = engine.verify(&desc(&[0.0, 0.0, 0.0]), &desc(&[0.0, 0.0, 0.0])).unwrap();
        assert!(v.matched);
        assert_eq!(v.distance, 0.0);
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn orthogonal_units_do_not_match() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let v = engine.verify(&desc(&[1.0, 0.0, 0.0]), &desc(&[0.0, 1.0, 0.0])).unwrap();
        assert!(!v.matched);
        assert!((v.distance - 1.414_213_5).abs() < 1e-5);
    }

    #[test]
    fn verify_is_deterministic() {
        let engine = VerificationEngine::new(MetricStrategy::preset(StrategyKind::ArcFace));
        let a = desc(&[0.2, 0.4, -0.1, 0.9]);
        let b = desc(&[0.25, 0.35, -0.05, 0.8]);
        assert_eq!(engine.verify(&a, &b).unwrap(), engine.verify(&a, &b).unwrap());
    }

    #[test]
    fn threshold_boundary_lands_on_opposite_sides() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let origin = desc(&[0.0]);
        assert!(!engine.verify(&origin, &desc(&[0.6])).unwrap().matched);
        assert!(engine.verify(&origin, &desc(&[0.599])).unwrap().matched);
        assert!(!engine.verify(&origin, &desc(&[0.601])).unwrap().matched);
    }

    #[test]
    fn dimension_mismatch_is_an_error_not_a_non_match() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let err = engine.verify(&desc(&[1.0, 2.0]), &desc(&[1.0])).unwrap_err();
        assert!(matches!(err, DistanceError::DimensionMismatch { .. }));
    }

    #[test]
    fn small_motion_same_person_is_live() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let v = engine
            .check_liveness(
                &FaceBox::new(10, 10, 50, 50),
                &desc(&[0.1, 0.2]),
                &FaceBox::new(12, 11, 51, 50),
                &desc(&[0.1, 0.2]),
            )
            .unwrap();
        assert_eq!(v.movement, 4.0);
        assert!(v.same_person);
        assert!(v.is_live);
    }

    #[test]
    fn motionless_pair_is_a_still_photo() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let b = FaceBox::new(10, 10, 50, 50);
        let v = engine
            .check_liveness(&b, &desc(&[0.1, 0.2]), &b, &desc(&[0.1, 0.2]))
            .unwrap();
        assert_eq!(v.movement, 0.0);
        assert!(v.same_person);
        assert!(!v.is_live);
    }

    #[test]
    fn large_jump_exceeds_upper_bound() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::bounded(2.0, 100.0)));
        let v = engine
            .check_liveness(
                &FaceBox::new(0, 0, 50, 50),
                &desc(&[0.1, 0.2]),
                &FaceBox::new(100, 50, 50, 50),
                &desc(&[0.1, 0.2]),
            )
            .unwrap();
        assert_eq!(v.movement, 150.0);
        assert!(v.same_person);
        assert!(!v.is_live);
    }

    #[test]
    fn different_person_is_never_live() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        for dx in [0u32, 3, 40, 400] {
            let v = engine
                .check_liveness(
                    &FaceBox::new(10, 10, 50, 50),
                    &desc(&[0.0, 0.0]),
                    &FaceBox::new(10 + dx, 10, 50, 50),
                    &desc(&[5.0, 5.0]),
                )
                .unwrap();
            assert!(!v.same_person);
            assert!(!v.is_live, "live at movement {dx}");
        }
    }

    #[test]
    fn liveness_uses_looser_cutoff_than_verify() {
        let engine = VerificationEngine::new(MetricStrategy::preset(StrategyKind::Histogram));
        // cos similarity = 0.65: between the 0.6 liveness and 0.7 verify cutoffs
        let a = FaceDescriptor::new(vec![1.0, 0.0], StrategyKind::Histogram);
        let b = FaceDescriptor::new(
            vec![0.65, (1.0f32 - 0.65 * 0.65).sqrt()],
            StrategyKind::Histogram,
        );

        assert!(!engine.verify(&a, &b).unwrap().matched);
        let v = engine
            .check_liveness(&FaceBox::new(0, 0, 40, 40), &a, &FaceBox::new(3, 0, 40, 40), &b)
            .unwrap();
        assert!(v.same_person);
        assert!(v.is_live);
    }

    #[test]
    fn liveness_returns_second_descriptor() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let second = desc(&[0.11, 0.21]);
        let v = engine
            .check_liveness(
                &FaceBox::new(0, 0, 10, 10),
                &desc(&[0.1, 0.2]),
                &FaceBox::new(5, 0, 10, 10),
                &second,
            )
            .unwrap();
        assert_eq!(v.descriptor, second);
    }

    #[test]
    fn detections_use_largest_face() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let first = DetectionResult::new(vec![
            detection(FaceBox::new(0, 0, 5, 5), &[9.0, 9.0]),
            detection(FaceBox::new(10, 10, 50, 50), &[0.1, 0.2]),
        ]);
        let second =
            DetectionResult::new(vec![detection(FaceBox::new(12, 11, 51, 50), &[0.1, 0.2])]);

        assert!(engine.verify_detections(&first, &second).unwrap().matched);
        let v = engine.check_liveness_detections(&first, &second).unwrap();
        assert_eq!(v.movement, 4.0);
        assert!(v.is_live);
    }

    #[test]
    fn empty_detection_reports_missing_descriptor() {
        let engine = VerificationEngine::new(l2_strategy(LivenessBand::lower_bound_only(2.0)));
        let some = DetectionResult::new(vec![detection(FaceBox::new(0, 0, 5, 5), &[0.0])]);
        let none = DetectionResult::empty();

        assert_eq!(
            engine.verify_detections(&none, &some).unwrap_err(),
            DecisionError::NoDescriptor(Frame::First)
        );
        assert_eq!(
            engine.check_liveness_detections(&some, &none).unwrap_err(),
            DecisionError::NoDescriptor(Frame::Second)
        );
    }

    #[test]
    fn verdicts_serialize_with_response_field_names() {
        let m = MatchVerdict {
            matched: true,
            distance: 0.25,
            confidence: 0.75,
        };
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["match"], true);
        assert_eq!(json["distance"], 0.25);

        let l = LivenessVerdict {
            is_live: false,
            movement: 0.0,
            same_person: true,
            distance: 0.0,
            descriptor: desc(&[0.5, 0.25]),
        };
        let json = serde_json::to_value(l).unwrap();
        assert_eq!(json["isLive"], false);
        assert_eq!(json["samePerson"], true);
        assert_eq!(json["faceDescriptor"], serde_json::json!([0.5, 0.25]));
    }
}
