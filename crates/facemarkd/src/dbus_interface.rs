use crate::session::{CaptureSession, SessionError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

/// D-Bus interface for the Facemark capture daemon.
///
/// Bus name: org.freedesktop.Facemark1
/// Object path: /org/freedesktop/Facemark1
pub struct FacemarkService {
    session: Arc<Mutex<CaptureSession>>,
    download_dir: PathBuf,
}

impl FacemarkService {
    pub fn new(session: Arc<Mutex<CaptureSession>>, download_dir: PathBuf) -> Self {
        Self {
            session,
            download_dir,
        }
    }
}

/// Clip metadata for `ListRecordings`. Sizes come from the stored payload
/// length, so listing never decodes a clip.
fn recordings_listing(session: &CaptureSession) -> serde_json::Value {
    let clips: Vec<_> = session
        .recordings()
        .iter()
        .enumerate()
        .map(|(index, clip)| {
            serde_json::json!({
                "index": index,
                "timestamp": clip.timestamp,
                "mime": clip.mime_type(),
                "bytes": clip.byte_len(),
            })
        })
        .collect();
    serde_json::json!({
        "revision": session.revision(),
        "clips": clips,
    })
}

fn to_fdo(e: SessionError) -> zbus::fdo::Error {
    match e {
        SessionError::NoSuchClip { .. } | SessionError::StaleRevision { .. } => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

#[interface(name = "org.freedesktop.Facemark1")]
impl FacemarkService {
    /// Begin recording the overlay surface.
    async fn start_recording(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_recording requested");
        self.session.lock().await.start_recording().map_err(to_fdo)
    }

    /// Stop recording and return once the clip is persisted.
    ///
    /// Returns JSON `{"saved": bool, "index": n|null}`; `saved` is false when
    /// nothing was being recorded.
    async fn stop_recording(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop_recording requested");
        // The lock is released while the recorder finalizes.
        let pending = self.session.lock().await.stop_recording();
        let Some(pending) = pending else {
            return Ok(serde_json::json!({ "saved": false, "index": null }).to_string());
        };

        let media = pending
            .wait()
            .await
            .map_err(|e| to_fdo(SessionError::Recorder(e)))?;
        let index = self.session.lock().await.save_clip(media).map_err(to_fdo)?;
        Ok(serde_json::json!({ "saved": true, "index": index }).to_string())
    }

    /// List recorded clips as JSON, with the list revision to pass to
    /// `DeleteRecording`.
    async fn list_recordings(&self) -> zbus::fdo::Result<String> {
        Ok(recordings_listing(&self.session.lock().await).to_string())
    }

    /// Write clip `index` to `dir` (the configured download directory when
    /// empty). Returns the written path.
    async fn download_recording(&self, index: u32, dir: &str) -> zbus::fdo::Result<String> {
        tracing::info!(index, dir, "download_recording requested");
        let dir = if dir.is_empty() {
            self.download_dir.clone()
        } else {
            PathBuf::from(dir)
        };
        let path = self
            .session
            .lock()
            .await
            .download_recording(index as usize, &dir)
            .map_err(to_fdo)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Delete clip `index` if the list is still at `revision`.
    async fn delete_recording(&self, index: u32, revision: u64) -> zbus::fdo::Result<()> {
        tracing::info!(index, revision, "delete_recording requested");
        self.session
            .lock()
            .await
            .delete_recording(index as usize, Some(revision))
            .map(|_| ())
            .map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.session.lock().await.status();
        let mut value = serde_json::to_value(status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        value["version"] = env!("CARGO_PKG_VERSION").into();
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecordedMedia;
    use crate::session::test_support::{session_with, FakeDevices};
    use facemark_store::ClipStore;

    #[test]
    fn test_listing_reports_payload_sizes() {
        let mut session = session_with(FakeDevices::default(), ClipStore::open_in_memory().unwrap());
        for chunks in [vec![vec![1u8; 5]], vec![vec![2u8; 1000], vec![3u8; 24]]] {
            session
                .save_clip(RecordedMedia {
                    mime: "video/webm".into(),
                    chunks,
                })
                .unwrap();
        }

        let listing = recordings_listing(&session);
        assert_eq!(listing["revision"], session.revision());
        let clips = listing["clips"].as_array().unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0]["bytes"], 5);
        assert_eq!(clips[1]["bytes"], 1024);
        assert_eq!(clips[1]["index"], 1);
        assert_eq!(clips[1]["mime"], "video/webm");
    }
}
