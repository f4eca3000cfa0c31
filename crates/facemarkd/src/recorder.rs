//! Surface recorder: samples the render feed at a fixed rate, encodes it and
//! buffers the encoded stream in time-sliced chunks.

use crate::render::{next_deadline, SurfaceFeed};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

/// Container MIME type produced by [`FfmpegEncoder`].
pub const RECORD_MIME: &str = "video/webm";

/// Longest the recorder thread sleeps before re-checking for stop.
const POLL_CAP: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("failed to start encoder: {0}")]
    Spawn(std::io::Error),
    #[error("encoder io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder failed: {0}")]
    EncoderFailed(String),
    #[error("recording aborted before it was finalized")]
    Aborted,
}

/// Capture and encoding parameters.
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Surface sampling rate.
    pub fps: u32,
    /// Target video bitrate in bits per second.
    pub bitrate: u32,
    /// Interval at which encoded output is cut into chunks.
    pub timeslice: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            fps: 15,
            bitrate: 2_500_000,
            timeslice: Duration::from_millis(500),
        }
    }
}

/// A streaming video encoder fed with RGBA frames.
pub trait Encoder: Send {
    fn push_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), RecorderError>;

    /// Drain whatever encoded bytes are ready. May be empty.
    fn take_output(&mut self) -> Vec<u8>;

    /// Flush the encoder and return the remaining encoded bytes.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, RecorderError>;

    fn mime_type(&self) -> &'static str;
}

/// Finalized recording: the encoded chunks in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMedia {
    pub mime: String,
    pub chunks: Vec<Vec<u8>>,
}

impl RecordedMedia {
    /// Concatenate chunks into the full video payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.chunks.concat()
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

/// Completion signal for a stopped recording.
pub struct PendingClip {
    rx: Option<oneshot::Receiver<Result<RecordedMedia, RecorderError>>>,
}

impl PendingClip {
    /// Wait until the recorder has flushed and finalized the stream.
    pub async fn wait(self) -> Result<RecordedMedia, RecorderError> {
        let rx = self.rx.ok_or(RecorderError::Aborted)?;
        rx.await.map_err(|_| RecorderError::Aborted)?
    }
}

/// An active recording.
pub struct Recorder {
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    /// Set once the recorder thread has exited, for any reason.
    finished: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<Result<RecordedMedia, RecorderError>>>,
}

impl Recorder {
    /// Start sampling `feed` into `encoder` on a dedicated thread.
    pub fn start(
        feed: SurfaceFeed,
        encoder: Box<dyn Encoder>,
        options: RecorderOptions,
    ) -> Result<Self, RecorderError> {
        let stop = Arc::new(AtomicBool::new(false));
        let abort = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let (fps, bitrate) = (options.fps, options.bitrate);

        {
            let stop = Arc::clone(&stop);
            let abort = Arc::clone(&abort);
            let finished = Arc::clone(&finished);
            std::thread::Builder::new()
                .name("facemark-recorder".into())
                .spawn(move || {
                    let result = record(feed, encoder, &options, &stop, &abort);
                    finished.store(true, Ordering::Release);
                    if abort.load(Ordering::Acquire) {
                        tracing::info!("recording discarded");
                        return;
                    }
                    if let Err(error) = &result {
                        tracing::error!(%error, "recording failed");
                    }
                    let _ = tx.send(result);
                })
                .map_err(RecorderError::Spawn)?;
        }

        tracing::info!(fps, bitrate, "recording started");
        Ok(Self {
            stop,
            abort,
            finished,
            done: Some(rx),
        })
    }

    /// True once the recorder thread has exited: after a stop was requested
    /// and finalized, or on its own because the encoder failed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Ask the recorder to finalize. Returns immediately; the clip is ready
    /// once the returned [`PendingClip`] resolves.
    pub fn stop(mut self) -> PendingClip {
        self.stop.store(true, Ordering::Release);
        PendingClip {
            rx: self.done.take(),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.done.is_some() {
            self.abort.store(true, Ordering::Release);
            self.stop.store(true, Ordering::Release);
        }
    }
}

fn record(
    feed: SurfaceFeed,
    mut encoder: Box<dyn Encoder>,
    options: &RecorderOptions,
    stop: &AtomicBool,
    abort: &AtomicBool,
) -> Result<RecordedMedia, RecorderError> {
    let frame_interval = Duration::from_secs(1) / options.fps.max(1);
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut frames = 0u64;

    let start = Instant::now();
    let mut next_frame = start;
    let mut next_slice = start + options.timeslice;

    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();

        if now >= next_frame {
            let latest = feed.borrow().clone();
            if let Some(surface) = latest {
                encoder.push_frame(surface.as_rgba(), surface.width(), surface.height())?;
                frames += 1;
            }
            next_frame = next_deadline(next_frame, now, frame_interval).0;
        }

        if now >= next_slice {
            cut_chunk(encoder.as_mut(), &mut chunks);
            next_slice = next_deadline(next_slice, now, options.timeslice).0;
        }

        let wake = next_frame.min(next_slice);
        let now = Instant::now();
        if wake > now {
            std::thread::sleep((wake - now).min(POLL_CAP));
        }
    }

    if abort.load(Ordering::Acquire) {
        return Err(RecorderError::Aborted);
    }

    cut_chunk(encoder.as_mut(), &mut chunks);
    let mime = encoder.mime_type().to_string();
    let tail = encoder.finish()?;
    if !tail.is_empty() {
        chunks.push(tail);
    }

    let media = RecordedMedia { mime, chunks };
    tracing::info!(
        frames,
        chunks = media.chunks.len(),
        bytes = media.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "recording finalized"
    );
    Ok(media)
}

/// Move ready encoder output into a new chunk; empty slices are not kept.
fn cut_chunk(encoder: &mut dyn Encoder, chunks: &mut Vec<Vec<u8>>) {
    let data = encoder.take_output();
    if !data.is_empty() {
        chunks.push(data);
    }
}

/// VP9/WebM encoder backed by an `ffmpeg` child process.
///
/// Raw RGBA frames go to ffmpeg's stdin; a reader thread collects the
/// muxed WebM stream from stdout.
pub struct FfmpegEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    output: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<std::io::Result<()>>>,
    width: u32,
    height: u32,
}

impl FfmpegEncoder {
    pub fn spawn(
        ffmpeg: &str,
        width: u32,
        height: u32,
        options: &RecorderOptions,
    ) -> Result<Self, RecorderError> {
        let mut process = Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &options.fps.to_string(),
                "-i",
                "pipe:0",
                "-an",
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                &options.bitrate.to_string(),
                "-deadline",
                "realtime",
                "-cpu-used",
                "8",
                "-f",
                "webm",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(RecorderError::Spawn)?;

        let stdin = process.stdin.take();
        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| RecorderError::EncoderFailed("failed to capture ffmpeg stdout".into()))?;

        let output = Arc::new(Mutex::new(Vec::new()));
        let reader = {
            let output = Arc::clone(&output);
            std::thread::Builder::new()
                .name("facemark-ffmpeg-out".into())
                .spawn(move || {
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        let n = stdout.read(&mut buf)?;
                        if n == 0 {
                            return Ok(());
                        }
                        output
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(&buf[..n]);
                    }
                })
                .map_err(RecorderError::Spawn)?
        };

        tracing::debug!(ffmpeg, width, height, bitrate = options.bitrate, "ffmpeg encoder started");

        Ok(Self {
            process,
            stdin,
            output,
            reader: Some(reader),
            width,
            height,
        })
    }
}

impl Encoder for FfmpegEncoder {
    fn push_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), RecorderError> {
        if width != self.width || height != self.height {
            return Err(RecorderError::EncoderFailed(format!(
                "frame size {width}x{height} does not match encoder {}x{}",
                self.width, self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RecorderError::EncoderFailed("encoder input already closed".into()))?;
        stdin.write_all(rgba)?;
        Ok(())
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, RecorderError> {
        drop(self.stdin.take());
        let status = self.process.wait()?;
        if let Some(reader) = self.reader.take() {
            reader
                .join()
                .map_err(|_| RecorderError::EncoderFailed("ffmpeg reader panicked".into()))??;
        }
        if !status.success() {
            return Err(RecorderError::EncoderFailed(format!("ffmpeg exited with {status}")));
        }
        Ok(self.take_output())
    }

    fn mime_type(&self) -> &'static str {
        RECORD_MIME
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}
