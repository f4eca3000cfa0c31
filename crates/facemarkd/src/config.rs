use crate::devices::SystemDevices;
use crate::recorder::RecorderOptions;
use crate::session::SessionOptions;
use facemark_core::LandmarkConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the render and recording rates. Above this the frame
/// interval is shorter than a scheduler tick and the loops just spin.
pub const MAX_FPS: u32 = 240;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the face mesh ONNX models.
    pub model_dir: PathBuf,
    /// Path to the SQLite database holding the clip list.
    pub db_path: PathBuf,
    /// Default target directory for downloads.
    pub download_dir: PathBuf,
    /// Try the CUDA execution provider before CPU.
    pub gpu_enabled: bool,
    /// Use the attention mesh (478 points) instead of the base mesh (468).
    pub refine_landmarks: bool,
    /// Render loop rate in cycles per second.
    pub render_fps: u32,
    /// Surface sampling rate while recording.
    pub record_fps: u32,
    /// Target video bitrate in bits per second.
    pub record_bitrate: u32,
    /// Interval at which encoded output is cut into chunks.
    pub record_timeslice_ms: u64,
    /// ffmpeg executable used for encoding.
    pub ffmpeg: String,
}

impl Config {
    /// Load configuration from `FACEMARK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEMARK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facemark_core::default_model_dir());

        let home = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()));
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("facemark");

        let db_path = std::env::var("FACEMARK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("clips.db"));

        let download_dir = std::env::var("FACEMARK_DOWNLOAD_DIR")
            .or_else(|_| std::env::var("XDG_DOWNLOAD_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("Downloads"));

        let record = RecorderOptions::default();
        Self {
            camera_device: std::env::var("FACEMARK_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            download_dir,
            gpu_enabled: env_flag("FACEMARK_GPU_ENABLED", true),
            refine_landmarks: env_flag("FACEMARK_REFINE_LANDMARKS", false),
            render_fps: clamp_fps(env_u32("FACEMARK_RENDER_FPS", 60)),
            record_fps: clamp_fps(env_u32("FACEMARK_RECORD_FPS", record.fps)),
            record_bitrate: env_u32("FACEMARK_RECORD_BITRATE", record.bitrate),
            record_timeslice_ms: env_u64(
                "FACEMARK_RECORD_TIMESLICE_MS",
                record.timeslice.as_millis() as u64,
            )
            .max(1),
            ffmpeg: std::env::var("FACEMARK_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            landmarks: LandmarkConfig {
                refine_landmarks: self.refine_landmarks,
                ..LandmarkConfig::default()
            },
            render_interval: Duration::from_secs(1) / clamp_fps(self.render_fps),
            recorder: RecorderOptions {
                fps: clamp_fps(self.record_fps),
                bitrate: self.record_bitrate,
                timeslice: Duration::from_millis(self.record_timeslice_ms),
            },
            ..SessionOptions::default()
        }
    }

    pub fn devices(&self) -> SystemDevices {
        SystemDevices {
            camera_device: self.camera_device.clone(),
            model_dir: self.model_dir.clone(),
            prefer_gpu: self.gpu_enabled,
            ffmpeg: self.ffmpeg.clone(),
        }
    }
}

fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(1, MAX_FPS)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
