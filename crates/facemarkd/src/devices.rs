//! Production collaborators: ONNX face mesh, V4L2 camera, ffmpeg encoder.

use crate::recorder::{Encoder, FfmpegEncoder, RecorderError, RecorderOptions};
use crate::session::Devices;
use facemark_core::{FaceMeshModel, LandmarkConfig, LandmarkEstimator, ModelError};
use facemark_hw::{Camera, CameraConstraints, CameraError, FrameSource};
use std::path::PathBuf;

pub struct SystemDevices {
    pub camera_device: String,
    pub model_dir: PathBuf,
    pub prefer_gpu: bool,
    pub ffmpeg: String,
}

impl Devices for SystemDevices {
    fn load_model(&mut self, config: LandmarkConfig) -> Result<Box<dyn LandmarkEstimator>, ModelError> {
        let path = self.model_dir.join(config.model_file());
        let model = FaceMeshModel::load_with_fallback(&path.to_string_lossy(), config, self.prefer_gpu)?;
        tracing::info!(
            backend = model.backend().name(),
            landmarks = config.landmark_count(),
            "face mesh model ready"
        );
        Ok(Box::new(model))
    }

    fn open_camera(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.camera_device, constraints)?;
        tracing::info!(
            device = %self.camera_device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera.start_stream()?))
    }

    fn create_encoder(
        &mut self,
        width: u32,
        height: u32,
        options: &RecorderOptions,
    ) -> Result<Box<dyn Encoder>, RecorderError> {
        Ok(Box::new(FfmpegEncoder::spawn(&self.ffmpeg, width, height, options)?))
    }
}
