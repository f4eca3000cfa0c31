//! Writing a stored clip out as a video file.

use crate::session::SessionError;
use facemark_store::RecordedClip;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name offered for clip `index`.
pub fn download_name(index: usize, extension: &str) -> String {
    format!("face-tracking-{index}.{extension}")
}

/// Decode `clip` and write it to `dir` as `face-tracking-<index>.<ext>`.
///
/// The bytes go to a temporary file in `dir` first, which is then renamed
/// into place; on any error the temporary file is removed.
pub fn write_download(clip: &RecordedClip, index: usize, dir: &Path) -> Result<PathBuf, SessionError> {
    let decoded = clip.decode()?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".facemark-download")
        .tempfile_in(dir)?;
    tmp.write_all(&decoded.bytes)?;
    tmp.as_file().sync_all()?;

    let target = dir.join(download_name(index, decoded.extension()));
    tmp.persist(&target).map_err(|e| SessionError::Io(e.error))?;

    tracing::info!(
        index,
        path = %target.display(),
        bytes = decoded.bytes.len(),
        "clip downloaded"
    );
    Ok(target)
}
