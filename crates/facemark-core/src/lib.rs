//! facemark-core — Face landmark inference and overlay drawing.
//!
//! Runs a single-face mesh model via ONNX Runtime (GPU when available,
//! CPU otherwise) and draws landmark markers onto an RGBA surface.

use std::path::PathBuf;

pub mod backend;
pub mod landmarks;
pub mod overlay;
pub mod types;

pub use backend::{select_backend, InferenceBackend};
pub use landmarks::{FaceMeshModel, ModelError};
pub use overlay::Surface;
pub use types::{FacePrediction, Landmark, LandmarkConfig, LandmarkEstimator};

/// Default directory searched for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facemark/models")
}
