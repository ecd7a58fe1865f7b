use camino::Utf8PathBuf as PathBuf;
use serde::Serialize;

/// A configured root directory of videos, exposed under `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub path: PathBuf,
    /// Never starts or ends with `/`, may be empty.
    pub prefix: String,
    pub preserve_upload_filename: bool,
}

impl Collection {
    pub fn new(path: impl Into<PathBuf>, prefix: &str, preserve_upload_filename: bool) -> Self {
        Collection {
            path: path.into(),
            prefix: prefix.trim_matches('/').to_owned(),
            preserve_upload_filename,
        }
    }
}
