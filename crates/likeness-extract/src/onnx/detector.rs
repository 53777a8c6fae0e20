use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::ExtractError;

/// Square network input side.
const INPUT_SIZE: u32 = 640;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_POINT: usize = 2;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
/// Boxes narrower or shorter than this (source pixels) are dropped.
const MIN_FACE_PX: f32 = 8.0;

/// Face candidate in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedFace {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl DetectedFace {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Self) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// SCRFD face detector (InsightFace `det_10g`).
pub struct ScrfdDetector {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl ScrfdDetector {
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::ModelMissing(path.to_path_buf()));
        }
        let session = Session::builder()?.commit_from_file(path)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ExtractError::ModelOutput("SCRFD model has no inputs".into()))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        // scores, boxes (and optionally keypoints) for each stride
        if output_names.len() < STRIDES.len() * 2 {
            return Err(ExtractError::ModelOutput(format!(
                "SCRFD model has {} outputs, expected at least {}",
                output_names.len(),
                STRIDES.len() * 2
            )));
        }
        Ok(Self {
            session,
            input_name,
            output_names,
        })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let (data, scale) = letterbox(image);
        let side = i64::from(INPUT_SIZE);
        let input = Tensor::from_array((vec![1i64, 3, side, side], data))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])?;

        let (img_w, img_h) = (image.width() as f32, image.height() as f32);
        let mut candidates = Vec::new();

        for (level, &stride) in STRIDES.iter().enumerate() {
            let score_name = &self.output_names[level];
            let bbox_name = &self.output_names[level + STRIDES.len()];
            let (Some(scores), Some(boxes)) = (outputs.get(score_name), outputs.get(bbox_name))
            else {
                return Err(ExtractError::ModelOutput(format!(
                    "missing SCRFD outputs for stride {stride}"
                )));
            };
            let (_, scores) = scores.try_extract_tensor::<f32>()?;
            let (_, boxes) = boxes.try_extract_tensor::<f32>()?;

            decode_level(scores, boxes, stride, scale, img_w, img_h, &mut candidates)?;
        }

        let kept = nms(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(faces = kept.len(), "SCRFD detection complete");
        Ok(kept)
    }
}

/// Resize preserving aspect ratio into the top-left of a black square,
/// normalized to `(v - 127.5) / 128` in NCHW RGB order.
fn letterbox(image: &RgbImage) -> (Vec<f32>, f32) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let scale = INPUT_SIZE as f32 / w.max(h);
    let nw = ((w * scale).round() as u32).clamp(1, INPUT_SIZE);
    let nh = ((h * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = image::imageops::resize(image, nw, nh, FilterType::Triangle);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    // Padding value is pixel 0 after normalization.
    let mut data = vec![-127.5 / 128.0; 3 * plane];
    for (x, y, p) in resized.enumerate_pixels() {
        let idx = (y * INPUT_SIZE + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (f32::from(p[c]) - 127.5) / 128.0;
        }
    }
    (data, scale)
}

/// Decode one stride level: anchor centers on a `640 / stride` grid, box
/// distances `(left, top, right, bottom)` in stride units.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    scale: f32,
    img_w: f32,
    img_h: f32,
    out: &mut Vec<DetectedFace>,
) -> Result<(), ExtractError> {
    let grid = (INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * ANCHORS_PER_POINT;
    if scores.len() < anchors || boxes.len() < anchors * 4 {
        return Err(ExtractError::ModelOutput(format!(
            "stride {stride}: {} scores / {} box values for {anchors} anchors",
            scores.len(),
            boxes.len()
        )));
    }

    let s = stride as f32;
    for (idx, &score) in scores.iter().take(anchors).enumerate() {
        if score < SCORE_THRESHOLD {
            continue;
        }
        let point = idx / ANCHORS_PER_POINT;
        let cx = (point % grid) as f32 * s;
        let cy = (point / grid) as f32 * s;
        let d = &boxes[idx * 4..idx * 4 + 4];

        let face = DetectedFace {
            x1: ((cx - d[0] * s) / scale).clamp(0.0, img_w),
            y1: ((cy - d[1] * s) / scale).clamp(0.0, img_h),
            x2: ((cx + d[2] * s) / scale).clamp(0.0, img_w),
            y2: ((cy + d[3] * s) / scale).clamp(0.0, img_h),
            score,
        };
        if face.x2 - face.x1 >= MIN_FACE_PX && face.y2 - face.y1 >= MIN_FACE_PX {
            out.push(face);
        }
    }
    Ok(())
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<DetectedFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.iou(&face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
