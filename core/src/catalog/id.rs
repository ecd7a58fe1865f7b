use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};

use super::CatalogError;
use crate::model::{Collection, VideoId};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm"];
pub const METADATA_EXTENSIONS: &[&str] = &["yml", "yaml"];
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Separates a derivative's master stem from its quality suffix.
pub const DERIVATIVE_SEPARATOR: char = '#';

/// What a file next to the videos is, as far as the catalog is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Video,
    /// `<stem>#<suffix>.mp4`
    Derivative { stem_path: PathBuf, suffix: String },
    /// `<stem>.yml` or `<stem>.yaml`
    Metadata { stem_path: PathBuf },
    /// `<stem>.jpg`
    Thumbnail { stem_path: PathBuf },
    Other,
}

pub fn classify(path: &Path) -> FileKind {
    let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
        return FileKind::Other;
    };
    let ext = ext.to_ascii_lowercase();
    let sibling = |stem: &str| path.with_file_name(stem);
    if ext == "mp4" {
        if let Some((master, suffix)) = stem.rsplit_once(DERIVATIVE_SEPARATOR) {
            if !master.is_empty() && !suffix.is_empty() {
                return FileKind::Derivative {
                    stem_path: sibling(master),
                    suffix: suffix.to_owned(),
                };
            }
        }
    }
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Video
    } else if METADATA_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Metadata {
            stem_path: sibling(stem),
        }
    } else if ext == THUMBNAIL_EXTENSION {
        FileKind::Thumbnail {
            stem_path: sibling(stem),
        }
    } else {
        FileKind::Other
    }
}

/// Derives the stable id of the video at `path`.
///
/// The path relative to the collection root, `/` separated, without
/// extension, behind the collection prefix if there is one.
pub fn derive_video_id(collection: &Collection, path: &Path) -> Result<VideoId, CatalogError> {
    let not_in_collection = || CatalogError::NotInCollection {
        path: path.to_owned(),
        root: collection.path.clone(),
    };
    let relative = path
        .strip_prefix(&collection.path)
        .map_err(|_| not_in_collection())?;
    let file_name = relative.file_name().ok_or_else(not_in_collection)?;
    let stem = Path::new(file_name).file_stem().unwrap_or(file_name);
    let mut parts: Vec<&str> = Vec::new();
    if !collection.prefix.is_empty() {
        parts.push(&collection.prefix);
    }
    if let Some(parent) = relative.parent() {
        parts.extend(parent.components().map(|c| c.as_str()));
    }
    parts.push(stem);
    Ok(VideoId(parts.join("/")))
}
