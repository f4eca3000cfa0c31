use anyhow::{Context, Result};
use facemark_store::ClipStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod devices;
mod download;
mod recorder;
mod render;
mod session;

use session::CaptureSession;

const BUS_NAME: &str = "org.freedesktop.Facemark1";
const OBJECT_PATH: &str = "/org/freedesktop/Facemark1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facemarkd starting");

    let config = config::Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        db = %config.db_path.display(),
        gpu = config.gpu_enabled,
        "configuration loaded"
    );

    let store = ClipStore::open(&config.db_path)
        .with_context(|| format!("failed to open clip store at {}", config.db_path.display()))?;

    let mut session = CaptureSession::new(Box::new(config.devices()), store, config.session_options());
    // Camera open and model load block; keep them off the async workers.
    let session = tokio::task::spawn_blocking(move || {
        session.initialize();
        session
    })
    .await
    .context("session initialization panicked")?;

    let status = session.status();
    match &status.error {
        Some(error) => tracing::warn!(%error, "capture unavailable; serving stored clips only"),
        None => tracing::info!(resolution = ?status.resolution, clips = status.clips, "capture session ready"),
    }

    let session = Arc::new(Mutex::new(session));
    let service = dbus_interface::FacemarkService::new(Arc::clone(&session), config.download_dir.clone());

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facemarkd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facemarkd shutting down");

    session.lock().await.teardown();
    Ok(())
}
