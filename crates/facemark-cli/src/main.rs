use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facemark_core::{FaceMeshModel, LandmarkConfig, LandmarkEstimator, Surface};
use facemark_hw::{Camera, CameraConstraints, FrameSource};
use std::path::PathBuf;
use std::time::Duration;

/// Frames discarded before the diagnostic capture (camera AE settling).
const WARMUP_FRAMES: usize = 4;

#[derive(Parser)]
#[command(name = "facemark", about = "Facemark face-tracking recorder CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start recording the landmark overlay
    Start,
    /// Stop recording and save the clip
    Stop,
    /// List recorded clips
    List,
    /// Write a recorded clip to disk as face-tracking-<index>.webm
    Download {
        /// Clip index as shown by `list`
        index: u32,
        /// Target directory (default: the daemon's download directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Delete a recorded clip
    Delete {
        /// Clip index as shown by `list`
        index: u32,
    },
    /// Show daemon status
    Status,
    /// Run camera and model diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the overlaid frame as a PNG
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.freedesktop.Facemark1",
    default_service = "org.freedesktop.Facemark1",
    default_path = "/org/freedesktop/Facemark1"
)]
trait Facemark {
    async fn start_recording(&self) -> zbus::Result<()>;
    async fn stop_recording(&self) -> zbus::Result<String>;
    async fn list_recordings(&self) -> zbus::Result<String>;
    async fn download_recording(&self, index: u32, dir: &str) -> zbus::Result<String>;
    async fn delete_recording(&self, index: u32, revision: u64) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

async fn connect() -> Result<FacemarkProxy<'static>> {
    // Stop waits for the encoder to finalize, so allow more than the default.
    let conn = zbus::connection::Builder::session()?
        .method_timeout(Duration::from_secs(60))
        .build()
        .await
        .context("failed to connect to the session bus")?;
    FacemarkProxy::new(&conn)
        .await
        .context("facemarkd is not running")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            connect().await?.start_recording().await?;
            println!("Recording...");
        }
        Commands::Stop => {
            let reply: serde_json::Value = serde_json::from_str(&connect().await?.stop_recording().await?)?;
            match reply["index"].as_u64() {
                Some(index) if reply["saved"] == true => println!("Saved clip {index}"),
                _ => println!("Not recording"),
            }
        }
        Commands::List => {
            let listing: serde_json::Value =
                serde_json::from_str(&connect().await?.list_recordings().await?)?;
            let clips = listing["clips"].as_array().cloned().unwrap_or_default();
            if clips.is_empty() {
                println!("No recordings");
            }
            for clip in clips {
                println!(
                    "{:>3}  {:<24}  {:>10}  {}",
                    clip["index"],
                    clip["timestamp"].as_str().unwrap_or("?"),
                    clip["bytes"].as_u64().map(human_bytes).unwrap_or_else(|| "corrupt".into()),
                    clip["mime"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Download { index, dir } => {
            let dir = dir.map(|d| d.to_string_lossy().into_owned()).unwrap_or_default();
            let path = connect().await?.download_recording(index, &dir).await?;
            println!("Wrote {path}");
        }
        Commands::Delete { index } => {
            let proxy = connect().await?;
            let listing: serde_json::Value = serde_json::from_str(&proxy.list_recordings().await?)?;
            let Some(revision) = listing["revision"].as_u64() else {
                bail!("daemon returned a listing without a revision");
            };
            proxy.delete_recording(index, revision).await?;
            println!("Deleted clip {index}");
        }
        Commands::Status => match connect().await {
            Ok(proxy) => {
                let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
                if let Some(error) = status["error"].as_str() {
                    println!(
                        "Error: {error}. Please ensure camera access is allowed and GPU inference is supported."
                    );
                }
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Err(e) => println!("facemarkd: not connected ({e:#})"),
        },
        Commands::Test { device, snapshot } => run_diagnostics(&device, snapshot)?,
    }

    Ok(())
}

fn run_diagnostics(device: &str, snapshot: Option<PathBuf>) -> Result<()> {
    tracing::debug!(device, "running camera diagnostics");
    println!("Video capture devices:");
    for info in Camera::list_devices() {
        println!("  {}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }

    let camera = Camera::open(device, &CameraConstraints::default())
        .with_context(|| format!("failed to open {device}"))?;
    println!(
        "Opened {device}: {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let mut stream = camera.start_stream()?;
    for _ in 0..WARMUP_FRAMES {
        stream.next_frame()?;
    }
    let frame = stream.next_frame()?;
    println!("Frame #{}: average brightness {:.1}", frame.sequence, frame.avg_brightness());

    let mut surface = Surface::new(frame.width, frame.height);
    surface.draw_frame(&frame.data, frame.width, frame.height);

    let config = LandmarkConfig::default();
    let model_dir = std::env::var("FACEMARK_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| facemark_core::default_model_dir());
    let model_path = model_dir.join(config.model_file());
    match FaceMeshModel::load_with_fallback(&model_path.to_string_lossy(), config, true) {
        Ok(mut model) => {
            let faces = model.estimate_faces(&frame.data, frame.width, frame.height)?;
            match faces.first() {
                Some(face) => {
                    let markers = surface.draw_landmarks(face);
                    println!(
                        "Face found ({} backend): {markers} landmarks, score {:.2}",
                        model.backend().name(),
                        face.confidence
                    );
                }
                None => println!("No face in frame ({} backend)", model.backend().name()),
            }
        }
        Err(e) => println!("Model unavailable: {e}"),
    }

    if let Some(path) = snapshot {
        surface
            .into_image()
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Snapshot written to {}", path.display());
    }
    Ok(())
}

fn human_bytes(n: u64) -> String {
    match n {
        n if n >= 1 << 20 => format!("{:.1} MiB", n as f64 / (1u64 << 20) as f64),
        n if n >= 1 << 10 => format!("{:.1} KiB", n as f64 / (1u64 << 10) as f64),
        n => format!("{n} B"),
    }
}
