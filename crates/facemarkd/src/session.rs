//! The capture session: owns the render loop, the active recording and the
//! clip list, and keeps the persisted list equal to the in-memory one.

use crate::download;
use crate::recorder::{Encoder, PendingClip, RecordedMedia, Recorder, RecorderError, RecorderOptions};
use crate::render::{RenderCounters, RenderLoop};
use chrono::Local;
use facemark_core::{LandmarkConfig, LandmarkEstimator, ModelError, Surface};
use facemark_hw::{CameraConstraints, CameraError, FrameSource};
use facemark_store::{ClipStore, RecordedClip, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Locale-style clip timestamp, e.g. `3/4/2026, 1:02:03 PM`.
pub const CLIP_TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

const GPU_UNAVAILABLE_MESSAGE: &str =
    "GPU inference is unavailable. Please check your CUDA installation for better performance.";

/// Failure while bringing the session up.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("failed to start render thread: {0}")]
    Spawn(std::io::Error),
}

impl InitError {
    /// Message shown to the user in place of the recording controls.
    pub fn user_message(&self) -> String {
        let text = self.to_string();
        if matches!(self, InitError::Model(_)) && mentions_gpu(&text) {
            return GPU_UNAVAILABLE_MESSAGE.to_string();
        }
        match self {
            InitError::Camera(CameraError::PermissionDenied(detail)) => {
                format!("Camera access was denied ({detail}). Please allow access to the video device")
            }
            _ => text,
        }
    }
}

fn mentions_gpu(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("cuda") || lower.contains("gpu")
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture session is not initialized")]
    NotInitialized,
    #[error("no clip at index {index} (have {len})")]
    NoSuchClip { index: usize, len: usize },
    #[error("clip list changed since revision {expected} (now {current}); list again")]
    StaleRevision { expected: u64, current: u64 },
    #[error("recorder: {0}")]
    Recorder(#[from] RecorderError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of the session's external collaborators: the landmark model,
/// the camera and the video encoder.
pub trait Devices: Send {
    fn load_model(&mut self, config: LandmarkConfig) -> Result<Box<dyn LandmarkEstimator>, ModelError>;

    fn open_camera(
        &mut self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn FrameSource>, CameraError>;

    fn create_encoder(
        &mut self,
        width: u32,
        height: u32,
        options: &RecorderOptions,
    ) -> Result<Box<dyn Encoder>, RecorderError>;
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub constraints: CameraConstraints,
    pub landmarks: LandmarkConfig,
    /// Render loop period.
    pub render_interval: Duration,
    pub recorder: RecorderOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            constraints: CameraConstraints::default(),
            landmarks: LandmarkConfig::default(),
            render_interval: Duration::from_secs(1) / 60,
            recorder: RecorderOptions::default(),
        }
    }
}

/// Snapshot reported over D-Bus and by `facemark status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub initialized: bool,
    pub error: Option<String>,
    pub recording: bool,
    /// Whether recording controls are offered (initialized and no error).
    pub controls_enabled: bool,
    pub clips: usize,
    pub revision: u64,
    pub resolution: Option<(u32, u32)>,
    pub render: Option<RenderCounters>,
}

pub struct CaptureSession {
    devices: Box<dyn Devices>,
    store: ClipStore,
    options: SessionOptions,
    initialized: bool,
    error: Option<String>,
    render: Option<RenderLoop>,
    resolution: Option<(u32, u32)>,
    recorder: Option<Recorder>,
    clips: Vec<RecordedClip>,
    /// Bumped on every clip-list mutation.
    revision: u64,
}

impl CaptureSession {
    pub fn new(devices: Box<dyn Devices>, store: ClipStore, options: SessionOptions) -> Self {
        Self {
            devices,
            store,
            options,
            initialized: false,
            error: None,
            render: None,
            resolution: None,
            recorder: None,
            clips: Vec::new(),
            revision: 0,
        }
    }

    /// Load the model, open the camera, start the render loop and load the
    /// persisted clips. Failures are recorded as the session error; the clip
    /// list is loaded either way.
    pub fn initialize(&mut self) {
        if self.initialized || self.error.is_some() {
            tracing::debug!("session already initialized");
            return;
        }

        if let Err(e) = self.start_pipeline() {
            tracing::error!(error = %e, "initialization failed");
            self.error = Some(e.user_message());
        }

        self.clips = match self.store.load() {
            Ok(clips) => clips,
            Err(error) => {
                tracing::warn!(%error, "persisted clip list unreadable, starting empty");
                Vec::new()
            }
        };
        tracing::info!(clips = self.clips.len(), "clip list loaded");
    }

    fn start_pipeline(&mut self) -> Result<(), InitError> {
        let model = self.devices.load_model(self.options.landmarks)?;
        let source = self.devices.open_camera(&self.options.constraints)?;
        let (width, height) = source.resolution();
        tracing::info!(width, height, "camera stream ready");

        let render = RenderLoop::spawn(
            source,
            model,
            Surface::new(width, height),
            self.options.render_interval,
        )
        .map_err(InitError::Spawn)?;

        self.resolution = Some((width, height));
        self.render = Some(render);
        self.initialized = true;
        Ok(())
    }

    pub fn controls_enabled(&self) -> bool {
        self.initialized && self.error.is_none()
    }

    /// False once the recorder thread has exited, including when the encoder
    /// failed mid-recording and nobody has called stop yet.
    pub fn is_recording(&self) -> bool {
        self.recorder.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Start capturing the surface. No-op when already recording.
    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        if !self.controls_enabled() {
            return Err(SessionError::NotInitialized);
        }
        if self.is_recording() {
            tracing::debug!("already recording");
            return Ok(());
        }
        if self.recorder.take().is_some() {
            tracing::warn!("replacing a recording that ended on its own");
        }
        let (Some(render), Some((width, height))) = (self.render.as_ref(), self.resolution) else {
            return Err(SessionError::NotInitialized);
        };

        let encoder = self.devices.create_encoder(width, height, &self.options.recorder)?;
        let recorder = Recorder::start(render.subscribe(), encoder, self.options.recorder.clone())?;
        self.recorder = Some(recorder);
        Ok(())
    }

    /// Signal the active recording to finalize. `None` (and no state change)
    /// when nothing is being recorded.
    pub fn stop_recording(&mut self) -> Option<PendingClip> {
        let recorder = self.recorder.take()?;
        tracing::info!("recording stop requested");
        Some(recorder.stop())
    }

    /// Append a finalized recording and persist the list. Returns the new
    /// clip's index.
    pub fn save_clip(&mut self, media: RecordedMedia) -> Result<usize, SessionError> {
        let timestamp = Local::now().format(CLIP_TIMESTAMP_FORMAT).to_string();
        let mime = media.mime.clone();
        let clip = RecordedClip::from_video(&media.into_bytes(), &mime, timestamp);

        self.clips.push(clip);
        if let Err(e) = self.store.save(&self.clips) {
            self.clips.pop();
            return Err(e.into());
        }
        self.revision += 1;

        let index = self.clips.len() - 1;
        tracing::info!(index, mime = %mime, "clip saved");
        Ok(index)
    }

    pub fn recordings(&self) -> &[RecordedClip] {
        &self.clips
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Write clip `index` to `dir` as `face-tracking-<index>.<ext>`.
    pub fn download_recording(&self, index: usize, dir: &Path) -> Result<PathBuf, SessionError> {
        let clip = self.clip(index)?;
        download::write_download(clip, index, dir)
    }

    /// Remove clip `index` and persist the list.
    ///
    /// With `expected_revision`, the delete only applies if the list has not
    /// changed since that revision was observed; a repeated delete issued
    /// against the same listing is rejected instead of removing the next clip.
    pub fn delete_recording(
        &mut self,
        index: usize,
        expected_revision: Option<u64>,
    ) -> Result<RecordedClip, SessionError> {
        if let Some(expected) = expected_revision {
            if expected != self.revision {
                return Err(SessionError::StaleRevision {
                    expected,
                    current: self.revision,
                });
            }
        }
        self.clip(index)?;

        let removed = self.clips.remove(index);
        if let Err(e) = self.store.save(&self.clips) {
            self.clips.insert(index, removed);
            return Err(e.into());
        }
        self.revision += 1;

        tracing::info!(index, remaining = self.clips.len(), "clip deleted");
        Ok(removed)
    }

    fn clip(&self, index: usize) -> Result<&RecordedClip, SessionError> {
        self.clips.get(index).ok_or(SessionError::NoSuchClip {
            index,
            len: self.clips.len(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            initialized: self.initialized,
            error: self.error.clone(),
            recording: self.is_recording(),
            controls_enabled: self.controls_enabled(),
            clips: self.clips.len(),
            revision: self.revision,
            resolution: self.resolution,
            render: self.render.as_ref().map(RenderLoop::counters),
        }
    }

    /// Discard any active recording, stop the render loop and release the
    /// camera and model. Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            drop(recorder);
            tracing::info!("active recording discarded");
        }
        if let Some(mut render) = self.render.take() {
            render.stop();
            tracing::info!("capture session torn down");
        }
        self.initialized = false;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
pub mod test_support {
    //! Fakes for the camera, landmark model and encoder.

    use super::*;
    use facemark_core::{FacePrediction, Landmark};
    use facemark_hw::Frame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Uniform mid-grey frames.
    pub struct FakeCamera {
        width: u32,
        height: u32,
        sequence: u32,
        released: Arc<AtomicBool>,
    }

    impl FakeCamera {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                sequence: 0,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn released_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.released)
        }
    }

    impl FrameSource for FakeCamera {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.sequence += 1;
            Ok(Frame {
                data: vec![128; (self.width * self.height * 3) as usize],
                width: self.width,
                height: self.height,
                timestamp: Instant::now(),
                sequence: self.sequence,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    impl Drop for FakeCamera {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Returns a fixed face, no face, or an error on every call.
    pub struct FakeModel {
        points: Option<Vec<(f32, f32)>>,
        fail: bool,
        released: Arc<AtomicBool>,
    }

    impl FakeModel {
        pub fn with_points(points: Vec<(f32, f32)>) -> Self {
            Self {
                points: Some(points),
                fail: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn no_face() -> Self {
            Self {
                points: None,
                fail: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn failing() -> Self {
            Self {
                points: None,
                fail: true,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn released_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.released)
        }
    }

    impl LandmarkEstimator for FakeModel {
        fn estimate_faces(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<FacePrediction>, ModelError> {
            if self.fail {
                return Err(ModelError::InferenceFailed("fake inference error".into()));
            }
            Ok(self
                .points
                .iter()
                .map(|points| FacePrediction {
                    landmarks: points.iter().map(|&(x, y)| Landmark { x, y, z: 0.0 }).collect(),
                    confidence: 1.0,
                })
                .collect())
        }
    }

    impl Drop for FakeModel {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Emits [`Self::HEADER`] up front, one [`Self::FRAME`] byte per pushed
    /// frame and [`Self::TRAILER`] on finish.
    pub struct FakeEncoder {
        pending: Vec<u8>,
        finished: Arc<AtomicBool>,
    }

    impl FakeEncoder {
        pub const HEADER: &'static [u8] = b"\x1a\x45\xdf\xa3";
        pub const TRAILER: &'static [u8] = b"CUES";
        pub const FRAME: u8 = 0xf0;

        pub fn finished_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.finished)
        }
    }

    impl Default for FakeEncoder {
        fn default() -> Self {
            Self {
                pending: Self::HEADER.to_vec(),
                finished: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Encoder for FakeEncoder {
        fn push_frame(&mut self, _rgba: &[u8], _width: u32, _height: u32) -> Result<(), RecorderError> {
            self.pending.push(Self::FRAME);
            Ok(())
        }

        fn take_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.pending)
        }

        fn finish(mut self: Box<Self>) -> Result<Vec<u8>, RecorderError> {
            self.finished.store(true, Ordering::SeqCst);
            let mut tail = std::mem::take(&mut self.pending);
            tail.extend_from_slice(Self::TRAILER);
            Ok(tail)
        }

        fn mime_type(&self) -> &'static str {
            crate::recorder::RECORD_MIME
        }
    }

    /// Accepts the first frame, then rejects every later one.
    #[derive(Default)]
    pub struct FailingEncoder {
        frames: usize,
    }

    impl Encoder for FailingEncoder {
        fn push_frame(&mut self, _rgba: &[u8], _width: u32, _height: u32) -> Result<(), RecorderError> {
            self.frames += 1;
            if self.frames > 1 {
                return Err(RecorderError::EncoderFailed("broken pipe".into()));
            }
            Ok(())
        }

        fn take_output(&mut self) -> Vec<u8> {
            Vec::new()
        }

        fn finish(self: Box<Self>) -> Result<Vec<u8>, RecorderError> {
            Ok(Vec::new())
        }

        fn mime_type(&self) -> &'static str {
            crate::recorder::RECORD_MIME
        }
    }

    #[derive(Default)]
    pub struct FakeDevices {
        pub deny_camera: bool,
        pub model_error: Option<String>,
        pub encoder_fails: bool,
    }

    impl Devices for FakeDevices {
        fn load_model(&mut self, _config: LandmarkConfig) -> Result<Box<dyn LandmarkEstimator>, ModelError> {
            match &self.model_error {
                Some(msg) => Err(ModelError::InferenceFailed(msg.clone())),
                None => Ok(Box::new(FakeModel::with_points(vec![(1.0, 1.0), (4.0, 4.0)]))),
            }
        }

        fn open_camera(
            &mut self,
            _constraints: &CameraConstraints,
        ) -> Result<Box<dyn FrameSource>, CameraError> {
            if self.deny_camera {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
            Ok(Box::new(FakeCamera::new(16, 12)))
        }

        fn create_encoder(
            &mut self,
            _width: u32,
            _height: u32,
            _options: &RecorderOptions,
        ) -> Result<Box<dyn Encoder>, RecorderError> {
            if self.encoder_fails {
                return Ok(Box::new(FailingEncoder::default()));
            }
            Ok(Box::new(FakeEncoder::default()))
        }
    }

    pub fn fast_options() -> SessionOptions {
        SessionOptions {
            render_interval: Duration::from_millis(2),
            recorder: RecorderOptions {
                fps: 100,
                bitrate: 1,
                timeslice: Duration::from_millis(10),
            },
            ..SessionOptions::default()
        }
    }

    pub fn session_with(devices: FakeDevices, store: ClipStore) -> CaptureSession {
        CaptureSession::new(Box::new(devices), store, fast_options())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use facemark_store::{KvStore, CLIPS_KEY};
    use std::time::Instant;

    /// Drop the clip table behind the session's back so the next save fails.
    fn break_storage(db: &Path) {
        rusqlite::Connection::open(db)
            .unwrap()
            .execute("DROP TABLE kv", [])
            .unwrap();
    }

    async fn wait_until_idle(session: &CaptureSession) {
        let started = Instant::now();
        while session.is_recording() {
            assert!(started.elapsed() < Duration::from_secs(2), "recording never ended");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn media(chunks: &[&[u8]]) -> RecordedMedia {
        RecordedMedia {
            mime: "video/webm".into(),
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        }
    }

    fn ready_session() -> CaptureSession {
        let mut session = session_with(FakeDevices::default(), ClipStore::open_in_memory().unwrap());
        session.initialize();
        session
    }

    #[test]
    fn test_initialize_starts_render_loop() {
        let mut session = ready_session();
        let status = session.status();
        assert!(status.initialized);
        assert!(status.controls_enabled);
        assert_eq!(status.resolution, Some((16, 12)));

        let started = Instant::now();
        while session.status().render.map_or(0, |r| r.cycles) == 0 {
            assert!(started.elapsed() < Duration::from_secs(2), "render loop never ran");
            std::thread::sleep(Duration::from_millis(1));
        }
        session.teardown();
    }

    #[test]
    fn test_permission_denied_disables_controls() {
        let store = ClipStore::open_in_memory().unwrap();
        store
            .save(&[RecordedClip::from_video(b"kept", "video/webm", "1/1/2026, 9:00:00 AM")])
            .unwrap();
        let mut session = session_with(
            FakeDevices {
                deny_camera: true,
                ..FakeDevices::default()
            },
            store,
        );
        session.initialize();

        let status = session.status();
        assert!(!status.initialized);
        assert!(!status.controls_enabled);
        let message = status.error.unwrap();
        assert!(message.contains("Camera access was denied"), "{message}");
        assert!(matches!(session.start_recording(), Err(SessionError::NotInitialized)));
        // Stored clips are still listed
        assert_eq!(session.recordings().len(), 1);
    }

    #[test]
    fn test_gpu_failure_has_dedicated_message() {
        let mut session = session_with(
            FakeDevices {
                model_error: Some("CUDA driver version is insufficient".into()),
                ..FakeDevices::default()
            },
            ClipStore::open_in_memory().unwrap(),
        );
        session.initialize();
        assert_eq!(session.status().error.as_deref(), Some(GPU_UNAVAILABLE_MESSAGE));
    }

    #[test]
    fn test_corrupt_storage_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("facemark.db");
        KvStore::open(&db).unwrap().set(CLIPS_KEY, "{not json").unwrap();
        let mut session = session_with(FakeDevices::default(), ClipStore::open(&db).unwrap());
        session.initialize();
        assert!(session.recordings().is_empty());
        assert!(session.status().error.is_none());
        session.teardown();
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut session = ready_session();
        let before = session.status();
        assert!(session.stop_recording().is_none());
        let after = session.status();
        assert_eq!(before.recording, after.recording);
        assert_eq!(before.clips, after.clips);
        assert_eq!(before.revision, after.revision);
    }

    #[tokio::test]
    async fn test_record_persists_exactly_one_clip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("facemark.db");
        let mut session = session_with(FakeDevices::default(), ClipStore::open(&db).unwrap());
        session.initialize();
        let before = ClipStore::open(&db).unwrap().load().unwrap().len();

        session.start_recording().unwrap();
        assert!(session.is_recording());
        session.start_recording().unwrap(); // no-op while recording
        tokio::time::sleep(Duration::from_millis(50)).await;

        let media = session.stop_recording().unwrap().wait().await.unwrap();
        assert!(!session.is_recording());
        let index = session.save_clip(media).unwrap();
        assert_eq!(index, before);
        assert!(!session.is_recording());

        let persisted = ClipStore::open(&db).unwrap().load().unwrap();
        assert_eq!(persisted.len(), before + 1);
        assert_eq!(persisted.last().map(|c| &c.timestamp), session.recordings().last().map(|c| &c.timestamp));
        assert_eq!(persisted, session.recordings());

        let bytes = session.recordings()[0].decode().unwrap().bytes;
        assert_eq!(&bytes[..4], FakeEncoder::HEADER);
        assert!(bytes.len() > FakeEncoder::HEADER.len() + FakeEncoder::TRAILER.len(), "no frames recorded");
    }

    #[tokio::test]
    async fn test_encoder_failure_clears_recording_state() {
        let mut session = session_with(
            FakeDevices {
                encoder_fails: true,
                ..FakeDevices::default()
            },
            ClipStore::open_in_memory().unwrap(),
        );
        session.initialize();
        session.start_recording().unwrap();
        wait_until_idle(&session).await;
        assert!(!session.status().recording);

        // The failure surfaces on stop and nothing is saved.
        let err = session.stop_recording().unwrap().wait().await.unwrap_err();
        assert!(matches!(err, RecorderError::EncoderFailed(_)), "{err}");
        assert!(session.recordings().is_empty());
        assert!(session.stop_recording().is_none());
    }

    #[tokio::test]
    async fn test_start_replaces_recording_that_ended_on_its_own() {
        let mut session = session_with(
            FakeDevices {
                encoder_fails: true,
                ..FakeDevices::default()
            },
            ClipStore::open_in_memory().unwrap(),
        );
        session.initialize();
        session.start_recording().unwrap();
        wait_until_idle(&session).await;

        session.start_recording().unwrap();
        assert!(session.is_recording());
        session.teardown();
    }

    #[test]
    fn test_save_failure_leaves_list_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("facemark.db");
        let mut session = session_with(FakeDevices::default(), ClipStore::open(&db).unwrap());
        session.initialize();
        session.save_clip(media(&[b"kept"])).unwrap();
        let clips = session.recordings().to_vec();
        let revision = session.revision();

        break_storage(&db);
        assert!(matches!(
            session.save_clip(media(&[b"lost"])),
            Err(SessionError::Storage(_))
        ));
        assert_eq!(session.recordings(), clips.as_slice());
        assert_eq!(session.revision(), revision);
        assert_eq!(session.status().clips, 1);
    }

    #[test]
    fn test_delete_failure_leaves_list_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("facemark.db");
        let mut session = session_with(FakeDevices::default(), ClipStore::open(&db).unwrap());
        session.initialize();
        session.save_clip(media(&[b"a"])).unwrap();
        session.save_clip(media(&[b"b"])).unwrap();
        let clips = session.recordings().to_vec();
        let revision = session.revision();

        break_storage(&db);
        assert!(matches!(
            session.delete_recording(0, Some(revision)),
            Err(SessionError::Storage(_))
        ));
        assert_eq!(session.recordings(), clips.as_slice());
        assert_eq!(session.revision(), revision);

        // The revision did not move, so the same listing can retry.
        assert!(matches!(
            session.delete_recording(0, Some(revision)),
            Err(SessionError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_download_of_recorded_clip_matches_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ready_session();
        session.start_recording().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let media = session.stop_recording().unwrap().wait().await.unwrap();
        assert!(media.chunks.len() > 1, "expected several timeslices");
        let expected = media.chunks.concat();
        let index = session.save_clip(media).unwrap();

        let path = session.download_recording(index, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "face-tracking-0.webm");
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, expected);
        assert!(written.starts_with(FakeEncoder::HEADER));
        assert!(written.ends_with(FakeEncoder::TRAILER));
    }

    #[test]
    fn test_timestamp_format() {
        let mut session = ready_session();
        session.save_clip(media(&[b"x"])).unwrap();
        let ts = &session.recordings()[0].timestamp;
        assert!(chrono::NaiveDateTime::parse_from_str(ts, "%m/%d/%Y, %I:%M:%S %p").is_ok(), "{ts}");
    }

    #[test]
    fn test_download_matches_buffered_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ready_session();
        let chunks: [&[u8]; 3] = [b"\x1a\x45\xdf\xa3", b"cluster-1", b"cluster-2"];
        let index = session.save_clip(media(&chunks)).unwrap();

        let path = session.download_recording(index, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "face-tracking-0.webm");
        assert_eq!(std::fs::read(&path).unwrap(), chunks.concat());
    }

    #[test]
    fn test_download_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let session = ready_session();
        assert!(matches!(
            session.download_recording(3, dir.path()),
            Err(SessionError::NoSuchClip { index: 3, len: 0 })
        ));
    }

    #[test]
    fn test_repeated_delete_against_same_listing() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("facemark.db");
        let mut session = session_with(FakeDevices::default(), ClipStore::open(&db).unwrap());
        session.initialize();
        session.save_clip(media(&[b"first"])).unwrap();
        session.save_clip(media(&[b"second"])).unwrap();
        let second = session.recordings()[1].clone();

        let seen = session.revision();
        session.delete_recording(0, Some(seen)).unwrap();
        assert!(matches!(
            session.delete_recording(0, Some(seen)),
            Err(SessionError::StaleRevision { .. })
        ));

        assert_eq!(session.recordings(), &[second.clone()]);
        assert_eq!(ClipStore::open(&db).unwrap().load().unwrap(), vec![second]);
    }

    #[test]
    fn test_unconditional_deletes_apply_in_order() {
        let mut session = ready_session();
        session.save_clip(media(&[b"a"])).unwrap();
        session.save_clip(media(&[b"b"])).unwrap();
        session.delete_recording(0, None).unwrap();
        session.delete_recording(0, None).unwrap();
        assert!(session.recordings().is_empty());
        assert!(matches!(
            session.delete_recording(0, None),
            Err(SessionError::NoSuchClip { index: 0, len: 0 })
        ));
    }

    #[tokio::test]
    async fn test_teardown_discards_recording_and_is_idempotent() {
        let mut session = ready_session();
        session.start_recording().unwrap();
        session.teardown();
        assert!(!session.is_recording());
        assert!(session.stop_recording().is_none());
        session.teardown();
        assert!(session.recordings().is_empty());
    }
}
