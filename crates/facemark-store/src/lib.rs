//! facemark-store — Local persistence for recorded clips.
//!
//! A single-table SQLite key-value store holds one JSON document: the
//! versioned list of recorded clips, each carrying its video as a data URI.

pub mod clips;
pub mod kv;

pub use clips::{ClipStore, DecodedClip, RecordedClip, CLIPS_KEY};
pub use kv::KvStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed clip list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported clip list version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
