//! Recorded clips, their data-URI payloads and the versioned persisted list.

use crate::kv::KvStore;
use crate::StorageError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage key holding the clip list.
pub const CLIPS_KEY: &str = "recorded-clips";
/// Current on-disk record version.
pub const CLIP_RECORD_VERSION: u32 = 1;

const DATA_URI_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// A recorded video clip. Identity is its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedClip {
    /// Video as `data:<mime>;base64,<payload>`.
    pub data: String,
    /// Human-readable local time of the recording.
    pub timestamp: String,
}

/// A clip's binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedClip {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DecodedClip {
    /// File extension for the clip's container.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "video/mp4" => "mp4",
            "video/x-matroska" => "mkv",
            _ => "webm",
        }
    }
}

impl RecordedClip {
    pub fn from_video(bytes: &[u8], mime: &str, timestamp: impl Into<String>) -> Self {
        Self {
            data: encode_data_uri(bytes, mime),
            timestamp: timestamp.into(),
        }
    }

    pub fn decode(&self) -> Result<DecodedClip, StorageError> {
        let (mime, payload) = split_data_uri(&self.data)?;
        Ok(DecodedClip {
            mime: mime.to_string(),
            bytes: STANDARD.decode(payload)?,
        })
    }

    pub fn mime_type(&self) -> Option<&str> {
        split_data_uri(&self.data).ok().map(|(mime, _)| mime)
    }

    /// Decoded payload size, computed from the base64 length and padding
    /// without decoding. `None` when the payload is not padded base64.
    pub fn byte_len(&self) -> Option<usize> {
        let (_, payload) = split_data_uri(&self.data).ok()?;
        if payload.len() % 4 != 0 {
            return None;
        }
        let padding = payload.bytes().rev().take_while(|&b| b == b'=').count();
        if padding > 2 {
            return None;
        }
        Some(payload.len() / 4 * 3 - padding)
    }
}

pub fn encode_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("{DATA_URI_PREFIX}{mime}{BASE64_MARKER},{}", STANDARD.encode(bytes))
}

/// Split a base64 data URI into `(mime, payload)`. Media-type parameters
/// (e.g. `;codecs=vp9`) are accepted and dropped from the mime.
fn split_data_uri(uri: &str) -> Result<(&str, &str), StorageError> {
    let rest = uri
        .strip_prefix(DATA_URI_PREFIX)
        .ok_or_else(|| StorageError::InvalidDataUri("missing data: scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| StorageError::InvalidDataUri("missing ',' separator".into()))?;
    let params = header
        .strip_suffix(BASE64_MARKER)
        .ok_or_else(|| StorageError::InvalidDataUri("payload is not base64".into()))?;
    let mime = params.split(';').next().unwrap_or_default();
    if mime.is_empty() || !mime.contains('/') {
        return Err(StorageError::InvalidDataUri(format!("bad media type {mime:?}")));
    }
    Ok((mime, payload))
}

#[derive(Serialize, Deserialize)]
struct ClipRecord {
    version: u32,
    clips: Vec<RecordedClip>,
}

/// Parse a persisted clip list. A bare JSON array (the unversioned layout)
/// is accepted as-is.
pub fn parse_clip_list(json: &str) -> Result<Vec<RecordedClip>, StorageError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let clips: Vec<RecordedClip> = if value.is_array() {
        tracing::debug!("loading unversioned clip list");
        serde_json::from_value(value)?
    } else {
        let record: ClipRecord = serde_json::from_value(value)?;
        if record.version != CLIP_RECORD_VERSION {
            return Err(StorageError::UnsupportedVersion(record.version));
        }
        record.clips
    };

    for clip in &clips {
        split_data_uri(&clip.data)?;
    }
    Ok(clips)
}

pub fn serialize_clip_list(clips: &[RecordedClip]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(&ClipRecord {
        version: CLIP_RECORD_VERSION,
        clips: clips.to_vec(),
    })?)
}

/// The persisted clip list under [`CLIPS_KEY`].
pub struct ClipStore {
    kv: KvStore,
}

impl ClipStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            kv: KvStore::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            kv: KvStore::open_in_memory()?,
        })
    }

    /// Load the list; an absent key is an empty list.
    pub fn load(&self) -> Result<Vec<RecordedClip>, StorageError> {
        match self.kv.get(CLIPS_KEY)? {
            Some(json) => parse_clip_list(&json),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the persisted list with `clips`.
    pub fn save(&self, clips: &[RecordedClip]) -> Result<(), StorageError> {
        self.kv.set(CLIPS_KEY, &serialize_clip_list(clips)?)?;
        tracing::debug!(count = clips.len(), "clip list persisted");
        Ok(())
    }
}
