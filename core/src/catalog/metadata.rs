use std::collections::BTreeSet;

use bytes::Bytes;
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{instrument, warn};

use super::id::{DERIVATIVE_SEPARATOR, METADATA_EXTENSIONS, THUMBNAIL_EXTENSION};
use crate::{
    model::{Thumbnail, Video, VideoId},
    processing::ffprobe::{probe_tags, FormatTags},
};

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    title: Option<String>,
    description: Option<String>,
}

/// Builds catalog entries from a video file and the files sharing its stem.
#[derive(Debug, Clone, Default)]
pub struct MetadataReader {
    ffprobe: Option<PathBuf>,
}

impl MetadataReader {
    /// Without an ffprobe binary embedded tags are not read.
    pub fn new(ffprobe: Option<PathBuf>) -> Self {
        MetadataReader { ffprobe }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn read_video(&self, id: VideoId, path: &Path) -> Result<Video> {
        let fs_meta = tokio::fs::metadata(path)
            .await
            .wrap_err(format!("could not stat {}", path))?;
        let timestamp: DateTime<Utc> = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let tags = match &self.ffprobe {
            Some(ffprobe) => probe_tags(path, ffprobe).await.unwrap_or_else(|err| {
                tracing::debug!(%path, "could not read embedded tags: {:#}", err);
                FormatTags::default()
            }),
            None => FormatTags::default(),
        };
        let stem_path = stem_path(path);
        let sidecar = read_sidecar(&stem_path).await.unwrap_or_else(|err| {
            warn!(%path, "ignoring metadata file: {:#}", err);
            Sidecar::default()
        });
        let title = sidecar
            .title
            .or(tags.title)
            .unwrap_or_else(|| path.file_name().unwrap_or_default().to_owned());
        let description = sidecar.description.or(tags.comment).unwrap_or_default();
        let thumbnail = read_thumbnail(&stem_path).await?;
        let qualities = find_qualities(path).await?;
        Ok(Video {
            id,
            title,
            description,
            path: path.to_owned(),
            timestamp,
            thumbnail,
            views: 0,
            qualities,
        })
    }
}

pub(super) fn stem_path(path: &Path) -> PathBuf {
    match path.file_stem() {
        Some(stem) => path.with_file_name(stem),
        None => path.to_owned(),
    }
}

async fn read_sidecar(stem_path: &Path) -> Result<Sidecar> {
    for ext in METADATA_EXTENSIONS {
        let sidecar_path = PathBuf::from(format!("{stem_path}.{ext}"));
        match tokio::fs::read_to_string(&sidecar_path).await {
            Ok(content) => {
                // an empty file parses as unit, not as a mapping
                if content.trim().is_empty() {
                    return Ok(Sidecar::default());
                }
                return serde_yaml::from_str(&content)
                    .wrap_err(format!("invalid metadata file {}", sidecar_path));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).wrap_err(format!("could not read {}", sidecar_path));
            }
        }
    }
    Ok(Sidecar::default())
}

async fn read_thumbnail(stem_path: &Path) -> Result<Thumbnail> {
    let thumb_path = PathBuf::from(format!("{stem_path}.{THUMBNAIL_EXTENSION}"));
    match tokio::fs::read(&thumb_path).await {
        Ok(data) => Ok(Thumbnail {
            data: Bytes::from(data),
            mime_type: "image/jpeg".to_owned(),
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Thumbnail::builtin_default()),
        Err(err) => Err(err).wrap_err(format!("could not read {}", thumb_path)),
    }
}

/// Suffixes of all `<stem>#<suffix>.mp4` files next to `path`.
async fn find_qualities(path: &Path) -> Result<BTreeSet<String>> {
    let mut qualities = BTreeSet::new();
    let (Some(dir), Some(stem)) = (path.parent(), path.file_stem()) else {
        return Ok(qualities);
    };
    let name_prefix = format!("{stem}{DERIVATIVE_SEPARATOR}");
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .wrap_err(format!("could not list {}", dir))?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(suffix) = file_name
            .strip_prefix(&name_prefix)
            .and_then(|rest| rest.strip_suffix(".mp4"))
        {
            if !suffix.is_empty() && !suffix.contains(DERIVATIVE_SEPARATOR) {
                qualities.insert(suffix.to_owned());
            }
        }
    }
    Ok(qualities)
}
