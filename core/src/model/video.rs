use std::collections::BTreeSet;

use bytes::Bytes;
use camino::Utf8PathBuf as PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::VideoId;

static DEFAULT_THUMBNAIL: &[u8] = include_bytes!("../../assets/default_thumbnail.jpg");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub data: Bytes,
    pub mime_type: String,
}

impl Thumbnail {
    /// Served for videos without embedded artwork or image sidecar.
    pub fn builtin_default() -> Self {
        Thumbnail {
            data: Bytes::from_static(DEFAULT_THUMBNAIL),
            mime_type: "image/jpeg".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Video {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    /// Absolute path of the master file
    #[serde(skip)]
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub thumbnail: Thumbnail,
    /// Not persisted in the catalog, filled in from the view store when read.
    pub views: i64,
    /// Suffixes of the downscaled derivatives found next to the master.
    pub qualities: BTreeSet<String>,
}

impl Video {
    /// Path of the derivative `<stem>#<suffix>.mp4` next to the master file.
    pub fn derivative_path(&self, suffix: &str) -> PathBuf {
        let stem = self.path.file_stem().unwrap_or_default();
        self.path.with_file_name(format!("{stem}#{suffix}.mp4"))
    }
}
