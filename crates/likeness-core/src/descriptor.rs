use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extraction technology that produced a descriptor.
///
/// Descriptors from different strategies are never comparable: vector length,
/// scale and the appropriate distance metric are all strategy-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// SCRFD + ArcFace ONNX pipeline (512-d, L2-normalized).
    ArcFace,
    /// FaceNet-style deep embedding (128-d, unnormalized).
    Facenet,
    /// Landmark-based encoder (128-d, dlib convention).
    Dlib,
    /// Haar cascade + intensity histogram descriptor.
    Histogram,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArcFace => "arcface",
            Self::Facenet => "facenet",
            Self::Dlib => "dlib",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy '{0}' (expected arcface, facenet, dlib or histogram)")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arcface" => Ok(Self::ArcFace),
            "facenet" => Ok(Self::Facenet),
            "dlib" => Ok(Self::Dlib),
            "histogram" => Ok(Self::Histogram),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// A fixed-length face descriptor tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    values: Vec<f32>,
    strategy: StrategyKind,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>, strategy: StrategyKind) -> Self {
        Self { values, strategy }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Detected face region in source-image pixel coordinates, `(x, y, w, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert the `(top, right, bottom, left)` corner encoding.
    ///
    /// Inverted corners collapse to a zero extent rather than wrapping.
    pub fn from_trbl(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            x: left,
            y: top,
            width: right.saturating_sub(left),
            height: bottom.saturating_sub(top),
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One detected face: region, descriptor and optional detector score.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: FaceBox,
    pub descriptor: FaceDescriptor,
    pub score: Option<f32>,
}

/// All faces an extractor found in one image.
///
/// An empty result is a valid outcome ("no face detected"), not an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub faces: Vec<FaceDetection>,
}

impl DetectionResult {
    pub fn new(faces: Vec<FaceDetection>) -> Self {
        Self { faces }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    /// The authoritative face: maximal `width * height`, earliest on ties.
    pub fn primary(&self) -> Option<&FaceDetection> {
        self.faces.iter().reduce(|best, face| {
            if face.bbox.area() > best.bbox.area() {
                face
            } else {
                best
            }
        })
    }

    pub fn into_primary(self) -> Option<FaceDetection> {
        let idx = self
            .faces
            .iter()
            .enumerate()
            .reduce(|best, cur| {
                if cur.1.bbox.area() > best.1.bbox.area() {
                    cur
                } else {
                    best
                }
            })
            .map(|(i, _)| i)?;
        self.faces.into_iter().nth(idx)
    }
}
