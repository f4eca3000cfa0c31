//! The render loop: camera frame → landmark inference → surface → feed.
//!
//! Runs on a dedicated OS thread that exclusively owns the frame source, the
//! model and the surface; all three are dropped when the thread exits.

use facemark_core::{LandmarkEstimator, Surface};
use facemark_hw::FrameSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Latest composed surface, published once per render cycle while watched.
pub type SurfaceFeed = watch::Receiver<Option<Arc<Surface>>>;

/// Counters shared between the render thread and status reporting.
#[derive(Default)]
pub struct RenderStats {
    cycles: AtomicU64,
    faces: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`RenderStats`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RenderCounters {
    pub cycles: u64,
    pub faces: u64,
    pub dropped: u64,
    pub errors: u64,
}

impl RenderStats {
    pub fn snapshot(&self) -> RenderCounters {
        RenderCounters {
            cycles: self.cycles.load(Ordering::Relaxed),
            faces: self.faces.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one render cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Frame drawn; `markers` landmark markers on top (0 when no face).
    Drawn { markers: usize },
    /// Capture or inference failed; the surface was left untouched.
    Skipped,
}

/// Handle to the running render thread.
pub struct RenderLoop {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<RenderStats>,
    feed: Arc<watch::Sender<Option<Arc<Surface>>>>,
}

impl RenderLoop {
    /// Spawn the render thread. The first cycle starts immediately.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        model: Box<dyn LandmarkEstimator>,
        surface: Surface,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(RenderStats::default());
        let (tx, _) = watch::channel(None);
        let feed = Arc::new(tx);

        let thread = {
            let stop = Arc::clone(&stop);
            let stats = Arc::clone(&stats);
            let feed = Arc::clone(&feed);
            std::thread::Builder::new()
                .name("facemark-render".into())
                .spawn(move || run(source, model, surface, interval, &stop, &stats, &feed))?
        };

        Ok(Self {
            stop,
            thread: Some(thread),
            stats,
            feed,
        })
    }

    /// Subscribe to composed surfaces. Publishing only happens while at
    /// least one subscriber exists.
    pub fn subscribe(&self) -> SurfaceFeed {
        self.feed.subscribe()
    }

    pub fn counters(&self) -> RenderCounters {
        self.stats.snapshot()
    }

    /// Cancel the pending schedule and wait for the thread to release the
    /// camera and model. An in-flight cycle completes first; its output is
    /// discarded. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("render thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut source: Box<dyn FrameSource>,
    mut model: Box<dyn LandmarkEstimator>,
    mut surface: Surface,
    interval: Duration,
    stop: &AtomicBool,
    stats: &RenderStats,
    feed: &watch::Sender<Option<Arc<Surface>>>,
) {
    tracing::info!(
        width = surface.width(),
        height = surface.height(),
        interval_ms = interval.as_secs_f64() * 1000.0,
        "render loop started"
    );

    let mut deadline = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let outcome = render_cycle(source.as_mut(), model.as_mut(), &mut surface);
        if stop.load(Ordering::Acquire) {
            break;
        }

        stats.cycles.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CycleOutcome::Drawn { markers } => {
                if markers > 0 {
                    stats.faces.fetch_add(1, Ordering::Relaxed);
                }
                if feed.receiver_count() > 0 {
                    feed.send_replace(Some(Arc::new(surface.clone())));
                }
            }
            CycleOutcome::Skipped => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        let (next, skipped) = next_deadline(deadline, Instant::now(), interval);
        if skipped > 0 {
            stats.dropped.fetch_add(skipped, Ordering::Relaxed);
            tracing::trace!(skipped, "render cycle overran, dropping frames");
        }
        deadline = next;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }

    tracing::info!(cycles = stats.cycles.load(Ordering::Relaxed), "render loop stopped");
    // source (camera stream) and model are dropped here
}

/// One draw cycle: capture, estimate, clear, draw frame, draw markers of the
/// first face. Failures are logged and leave the surface as it was.
pub fn render_cycle(
    source: &mut dyn FrameSource,
    model: &mut dyn LandmarkEstimator,
    surface: &mut Surface,
) -> CycleOutcome {
    let frame = match source.next_frame() {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(%error, "frame capture failed");
            return CycleOutcome::Skipped;
        }
    };

    let faces = match model.estimate_faces(&frame.data, frame.width, frame.height) {
        Ok(faces) => faces,
        Err(error) => {
            tracing::warn!(%error, seq = frame.sequence, "detection failed");
            return CycleOutcome::Skipped;
        }
    };

    surface.clear();
    surface.draw_frame(&frame.data, frame.width, frame.height);
    let markers = faces.first().map(|face| surface.draw_landmarks(face)).unwrap_or(0);
    CycleOutcome::Drawn { markers }
}

/// Next schedule point after a cycle that was due at `deadline`.
///
/// Frames are dropped, not queued: if `now` is past one or more interval
/// boundaries the next deadline is the first boundary after `now`, and the
/// number of boundaries skipped is returned alongside.
pub fn next_deadline(deadline: Instant, now: Instant, interval: Duration) -> (Instant, u64) {
    let next = deadline + interval;
    if next > now || interval.is_zero() {
        return (next, 0);
    }
    let behind = now.duration_since(next).as_nanos();
    let period = interval.as_nanos();
    let skipped = u64::try_from(behind / period + 1).unwrap_or(u64::MAX);
    // Land on the boundary after `now` without multiplying the interval.
    let rem = behind % period;
    let rem = Duration::new((rem / 1_000_000_000) as u64, (rem % 1_000_000_000) as u32);
    (now + (interval - rem), skipped)
}
