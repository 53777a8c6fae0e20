//! Inter-frame movement scoring for passive liveness.
//!
//! A photograph held in front of the camera produces the same face box in
//! two consecutive captures. A live subject drifts, nods or shifts distance,
//! so the detected box moves or changes size between frames.
//!
//! The score is the Manhattan sum over the four box components in the
//! canonical `(x, y, w, h)` encoding. Extractors that report corners must
//! convert with [`FaceBox::from_trbl`] before scoring.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and still images replayed frame-for-frame.
//! - **Does not block:** Video replay, a photo moved by hand, or 3D masks.

use serde::{Deserialize, Serialize};

use crate::descriptor::FaceBox;

/// Movement range considered consistent with a live subject.
///
/// Both bounds are strict. `max_exclusive = None` accepts any movement above
/// the lower bound; a bound rejects implausibly large jumps (face swap or a
/// different subject entering the frame).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessBand {
    pub min_exclusive: f32,
    pub max_exclusive: Option<f32>,
}

impl LivenessBand {
    pub fn lower_bound_only(min_exclusive: f32) -> Self {
        Self {
            min_exclusive,
            max_exclusive: None,
        }
    }

    pub fn bounded(min_exclusive: f32, max_exclusive: f32) -> Self {
        Self {
            min_exclusive,
            max_exclusive: Some(max_exclusive),
        }
    }

    pub fn contains(&self, movement: f32) -> bool {
        movement > self.min_exclusive && self.max_exclusive.map_or(true, |max| movement < max)
    }
}

/// Sum of absolute differences of `x`, `y`, `width` and `height`.
pub fn movement(a: &FaceBox, b: &FaceBox) -> f32 {
    let total = u64::from(a.x.abs_diff(b.x))
        + u64::from(a.y.abs_diff(b.y))
        + u64::from(a.width.abs_diff(b.width))
        + u64::from(a.height.abs_diff(b.height));
    total as f32
}
