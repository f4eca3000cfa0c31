use crate::landmarks::ModelError;
use serde::{Deserialize, Serialize};

/// Number of points produced by the base face mesh.
pub const MESH_LANDMARKS: usize = 468;
/// Number of points produced by the attention mesh (mesh + iris refinement).
pub const REFINED_LANDMARKS: usize = 478;

/// A single face-surface point in frame pixel coordinates.
///
/// `z` is relative depth in the same scale as `x`; smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Landmarks for one detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacePrediction {
    pub landmarks: Vec<Landmark>,
    /// Face-presence probability in [0, 1].
    pub confidence: f32,
}

impl FacePrediction {
    /// Axis-aligned bounds `(min_x, min_y, max_x, max_y)` of the landmarks.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.landmarks.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.landmarks.iter().fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
        }))
    }
}

/// Model load options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkConfig {
    /// Upper bound on faces returned per frame.
    pub max_faces: usize,
    /// Use the attention mesh with iris refinement (slower).
    pub refine_landmarks: bool,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            max_faces: 1,
            refine_landmarks: false,
        }
    }
}

impl LandmarkConfig {
    /// Points per face for this configuration.
    pub fn landmark_count(&self) -> usize {
        if self.refine_landmarks {
            REFINED_LANDMARKS
        } else {
            MESH_LANDMARKS
        }
    }

    /// Model file name expected in the model directory.
    pub fn model_file(&self) -> &'static str {
        if self.refine_landmarks {
            "face_landmark_with_attention.onnx"
        } else {
            "face_landmark.onnx"
        }
    }
}

/// Per-frame face landmark estimation over a packed RGB24 frame.
pub trait LandmarkEstimator: Send {
    fn estimate_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FacePrediction>, ModelError>;
}
