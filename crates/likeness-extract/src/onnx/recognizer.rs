use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::detector::DetectedFace;
use crate::ExtractError;

const INPUT_SIZE: u32 = 112;
/// Context kept around the detector box before cropping, as a fraction of its side.
const CROP_MARGIN: f32 = 0.1;

/// ArcFace recognizer (InsightFace `w600k_r50`), 512-d L2-normalized output.
pub struct ArcFaceRecognizer {
    session: Session,
    input_name: String,
    output_name: String,
}

impl ArcFaceRecognizer {
    pub fn load(path: &Path) -> Result<Self, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::ModelMissing(path.to_path_buf()));
        }
        let session = Session::builder()?.commit_from_file(path)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ExtractError::ModelOutput("ArcFace model has no inputs".into()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ExtractError::ModelOutput("ArcFace model has no outputs".into()))?;
        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &DetectedFace,
    ) -> Result<Vec<f32>, ExtractError> {
        let data = preprocess(image, face)?;
        let side = i64::from(INPUT_SIZE);
        let input = Tensor::from_array((vec![1i64, 3, side, side], data))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])?;
        let value = outputs.get(&self.output_name).ok_or_else(|| {
            ExtractError::ModelOutput(format!("missing ArcFace output '{}'", self.output_name))
        })?;
        let (_, raw) = value.try_extract_tensor::<f32>()?;
        l2_normalize(raw.to_vec())
    }
}

/// Square crop around the face with a small margin, resized to 112x112,
/// normalized to `(v - 127.5) / 127.5` in NCHW RGB order.
fn preprocess(image: &RgbImage, face: &DetectedFace) -> Result<Vec<f32>, ExtractError> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let side = (face.x2 - face.x1).max(face.y2 - face.y1) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = (face.x1 + face.x2) / 2.0;
    let cy = (face.y1 + face.y2) / 2.0;

    let x0 = (cx - side / 2.0).clamp(0.0, w - 1.0) as u32;
    let y0 = (cy - side / 2.0).clamp(0.0, h - 1.0) as u32;
    let x1 = (cx + side / 2.0).clamp(0.0, w) as u32;
    let y1 = (cy + side / 2.0).clamp(0.0, h) as u32;
    if x1 <= x0 || y1 <= y0 {
        return Err(ExtractError::ModelOutput(format!(
            "degenerate face crop ({x0},{y0})-({x1},{y1})"
        )));
    }

    let crop = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, p) in resized.enumerate_pixels() {
        let idx = (y * INPUT_SIZE + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (f32::from(p[c]) - 127.5) / 127.5;
        }
    }
    Ok(data)
}

fn l2_normalize(mut v: Vec<f32>) -> Result<Vec<f32>, ExtractError> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(ExtractError::ModelOutput(format!(
            "ArcFace embedding has invalid norm {norm}"
        )));
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Ok(v)
}
