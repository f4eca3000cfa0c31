//! Face mesh landmark model via ONNX Runtime.
//!
//! Runs a MediaPipe-style face mesh network on a square region of interest.
//! The first frame (and any frame after the face is lost) uses the whole
//! frame letterboxed into the model input; while a face is tracked the next
//! region is derived from the previous frame's landmarks.

use crate::backend::{select_backend, InferenceBackend};
use crate::types::{FacePrediction, Landmark, LandmarkConfig, LandmarkEstimator};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const MESH_INPUT_SIZE: usize = 192;
const MESH_PIXEL_SCALE: f32 = 255.0;
const FACE_PRESENCE_THRESHOLD: f32 = 0.5;
/// Region-of-interest growth around the previous face bounds.
const ROI_EXPANSION: f32 = 1.5;

const LANDMARK_OUTPUT_NAMES: [&str; 3] = ["landmarks", "conv2d_21", "output_mesh_identity"];
const SCORE_OUTPUT_NAMES: [&str; 3] = ["score", "conv2d_31", "conv_faceflag"];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} — place the face mesh ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputLayout {
    /// [1, H, W, 3], the layout of TFLite-converted exports.
    Nhwc,
    /// [1, 3, H, W]
    Nchw,
}

/// Square source region (frame pixels) mapped onto the model input.
///
/// May extend past the frame edges; samples outside the frame are black.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Roi {
    x: f32,
    y: f32,
    size: f32,
}

impl Roi {
    /// Whole frame, centered, padded to a square on the short side.
    fn full_frame(width: u32, height: u32) -> Self {
        let size = width.max(height) as f32;
        Self {
            x: (width as f32 - size) / 2.0,
            y: (height as f32 - size) / 2.0,
            size,
        }
    }

    /// Square around a previous prediction, expanded for head motion.
    fn around(face: &FacePrediction) -> Option<Self> {
        let (x0, y0, x1, y1) = face.bounds()?;
        let size = (x1 - x0).max(y1 - y0) * ROI_EXPANSION;
        if size < 1.0 {
            return None;
        }
        let cx = (x0 + x1) / 2.0;
        let cy = (y0 + y1) / 2.0;
        Some(Self {
            x: cx - size / 2.0,
            y: cy - size / 2.0,
            size,
        })
    }

    /// Model-input pixels per source pixel.
    fn scale(&self) -> f32 {
        MESH_INPUT_SIZE as f32 / self.size
    }

    /// Map a model-space point back to frame coordinates.
    fn to_frame(&self, x: f32, y: f32, z: f32) -> Landmark {
        let s = self.scale();
        Landmark {
            x: self.x + x / s,
            y: self.y + y / s,
            z: z / s,
        }
    }
}

/// Face mesh landmark model.
pub struct FaceMeshModel {
    session: Session,
    backend: InferenceBackend,
    layout: InputLayout,
    landmarks_idx: usize,
    score_idx: usize,
    config: LandmarkConfig,
    /// Region derived from the last successful prediction.
    tracked: Option<Roi>,
}

impl FaceMeshModel {
    /// Load the model on a specific backend.
    pub fn load(
        model_path: &str,
        config: LandmarkConfig,
        backend: InferenceBackend,
    ) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_execution_providers(backend.execution_providers())?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            backend = backend.name(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face mesh model"
        );

        if output_names.len() < 2 {
            return Err(ModelError::InferenceFailed(format!(
                "face mesh model requires landmark and score outputs, got {}",
                output_names.len()
            )));
        }

        let layout = session
            .inputs()
            .first()
            .and_then(|i| i.dtype().tensor_shape())
            .map(|shape| layout_for_shape(shape))
            .unwrap_or(InputLayout::Nhwc);

        let (landmarks_idx, score_idx) = discover_output_indices(&output_names);
        tracing::debug!(landmarks_idx, score_idx, ?layout, "face mesh tensor mapping");

        Ok(Self {
            session,
            backend,
            layout,
            landmarks_idx,
            score_idx,
            config,
            tracked: None,
        })
    }

    /// Select a backend and load; if the GPU session cannot be created, log
    /// and retry on CPU.
    pub fn load_with_fallback(
        model_path: &str,
        config: LandmarkConfig,
        prefer_gpu: bool,
    ) -> Result<Self, ModelError> {
        match select_backend(prefer_gpu) {
            InferenceBackend::Cuda => match Self::load(model_path, config, InferenceBackend::Cuda) {
                Ok(model) => Ok(model),
                Err(ModelError::ModelNotFound(path)) => Err(ModelError::ModelNotFound(path)),
                Err(error) => {
                    tracing::warn!(%error, "CUDA session failed, falling back to CPU");
                    Self::load(model_path, config, InferenceBackend::Cpu)
                }
            },
            InferenceBackend::Cpu => Self::load(model_path, config, InferenceBackend::Cpu),
        }
    }

    pub fn backend(&self) -> InferenceBackend {
        self.backend
    }

    /// Sample the region of interest into a normalized input tensor.
    fn preprocess(&self, rgb: &[u8], width: usize, height: usize, roi: &Roi) -> Array4<f32> {
        let mut tensor = match self.layout {
            InputLayout::Nhwc => Array4::<f32>::zeros((1, MESH_INPUT_SIZE, MESH_INPUT_SIZE, 3)),
            InputLayout::Nchw => Array4::<f32>::zeros((1, 3, MESH_INPUT_SIZE, MESH_INPUT_SIZE)),
        };

        for y in 0..MESH_INPUT_SIZE {
            for x in 0..MESH_INPUT_SIZE {
                let Some(px) = sample_bilinear(rgb, width, height, roi, x, y) else {
                    continue; // outside the frame: stays 0.0
                };
                for (c, value) in px.iter().enumerate() {
                    let v = value / MESH_PIXEL_SCALE;
                    match self.layout {
                        InputLayout::Nhwc => tensor[[0, y, x, c]] = v,
                        InputLayout::Nchw => tensor[[0, c, y, x]] = v,
                    }
                }
            }
        }

        tensor
    }

    fn run(&mut self, rgb: &[u8], width: u32, height: u32, roi: &Roi) -> Result<Option<FacePrediction>, ModelError> {
        let input = self.preprocess(rgb, width as usize, height as usize, roi);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[self.landmarks_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("landmarks: {e}")))?;
        let (_, score) = outputs[self.score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("face score: {e}")))?;

        let logit = score
            .first()
            .copied()
            .ok_or_else(|| ModelError::InferenceFailed("empty face score tensor".into()))?;
        let confidence = sigmoid(logit);
        if confidence < FACE_PRESENCE_THRESHOLD {
            return Ok(None);
        }

        let landmarks = decode_landmarks(raw, self.config.landmark_count(), roi)?;
        Ok(Some(FacePrediction {
            landmarks,
            confidence,
        }))
    }
}

impl LandmarkEstimator for FaceMeshModel {
    fn estimate_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FacePrediction>, ModelError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(ModelError::InferenceFailed(format!(
                "frame buffer too short: expected {expected}, got {}",
                rgb.len()
            )));
        }

        let mut faces = Vec::new();
        if self.config.max_faces == 0 {
            return Ok(faces);
        }

        // Tracked region first; if the face slipped out of it, retry on the full frame.
        let mut prediction = None;
        if let Some(roi) = self.tracked {
            prediction = self.run(rgb, width, height, &roi)?;
        }
        if prediction.is_none() {
            prediction = self.run(rgb, width, height, &Roi::full_frame(width, height))?;
        }

        self.tracked = prediction.as_ref().and_then(Roi::around);
        faces.extend(prediction);
        faces.truncate(self.config.max_faces);
        Ok(faces)
    }
}

impl Drop for FaceMeshModel {
    fn drop(&mut self) {
        tracing::debug!(backend = self.backend.name(), "releasing face mesh session");
    }
}

fn layout_for_shape(shape: &[i64]) -> InputLayout {
    if shape.len() == 4 && shape[1] == 3 {
        InputLayout::Nchw
    } else {
        InputLayout::Nhwc
    }
}

/// Discover (landmarks, score) output indices by name, falling back to
/// positional ordering [0] = landmarks, [1] = score.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));

    match (find(&LANDMARK_OUTPUT_NAMES), find(&SCORE_OUTPUT_NAMES)) {
        (Some(lm), Some(score)) => (lm, score),
        _ => {
            tracing::info!(
                ?names,
                "face mesh output names not recognized, using positional mapping [0]=landmarks, [1]=score"
            );
            (0, 1)
        }
    }
}

/// Decode `count` (x, y, z) triples from model space into frame space.
fn decode_landmarks(raw: &[f32], count: usize, roi: &Roi) -> Result<Vec<Landmark>, ModelError> {
    if raw.len() < count * 3 {
        return Err(ModelError::InferenceFailed(format!(
            "landmark tensor has {} values, need {}",
            raw.len(),
            count * 3
        )));
    }
    Ok(raw[..count * 3]
        .chunks_exact(3)
        .map(|p| roi.to_frame(p[0], p[1], p[2]))
        .collect())
}

/// Bilinear RGB sample for model-input pixel `(x, y)`, or `None` outside the frame.
fn sample_bilinear(rgb: &[u8], width: usize, height: usize, roi: &Roi, x: usize, y: usize) -> Option<[f32; 3]> {
    let inv_scale = 1.0 / roi.scale();
    let src_x = roi.x + (x as f32 + 0.5) * inv_scale - 0.5;
    let src_y = roi.y + (y as f32 + 0.5) * inv_scale - 0.5;
    if src_x < -0.5 || src_y < -0.5 || src_x > width as f32 - 0.5 || src_y > height as f32 - 0.5 {
        return None;
    }

    let x0 = (src_x.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (src_y.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
    let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

    let at = |px: usize, py: usize, c: usize| rgb[(py * width + px) * 3 + c] as f32;
    let mut out = [0.0f32; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - fx) + at(x1, y0, c) * fx;
        let bot = at(x0, y1, c) * (1.0 - fx) + at(x1, y1, c) * fx;
        *slot = top * (1.0 - fy) + bot * fy;
    }
    Some(out)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
