use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use tempfile::TempDir;

use super::IngestError;
use crate::model::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStage {
    Staging,
    Transcoding,
    Thumbnailing,
    Publishing,
    /// Downscaled variants, after the master is published
    Deriving,
    Done,
    Failed,
}

/// One ingestion in flight.
///
/// Owns a private scratch directory that is deleted together with
/// everything in it when this is dropped, whichever way the run ends.
#[derive(Debug)]
pub struct PendingIngestion {
    scratch: TempDir,
    scratch_path: PathBuf,
    /// Staged source inside the scratch directory
    pub source: PathBuf,
    pub target: Collection,
    pub title: String,
    pub description: String,
    /// Filename the client claimed for the upload
    pub original_filename: Option<String>,
    /// Thumbnail fetched along with an import
    pub thumbnail: Option<PathBuf>,
}

impl PendingIngestion {
    /// Creates the scratch directory below `scratch_root`. `source_name` is
    /// the file name the source is going to be staged under.
    pub fn create(
        scratch_root: &Path,
        target: Collection,
        source_name: &str,
    ) -> Result<PendingIngestion, IngestError> {
        let scratch = tempfile::Builder::new()
            .prefix("tube-ingest-")
            .tempdir_in(scratch_root)
            .map_err(IngestError::Stage)?;
        let scratch_path = PathBuf::from_path_buf(scratch.path().to_owned()).map_err(|p| {
            IngestError::Stage(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("scratch path {} is not UTF-8", p.display()),
            ))
        })?;
        let source = scratch_path.join(source_name);
        Ok(PendingIngestion {
            scratch,
            scratch_path,
            source,
            target,
            title: String::new(),
            description: String::new(),
            original_filename: None,
            thumbnail: None,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_path
    }

    /// Deletes the scratch directory now and reports failures, dropping
    /// does the same silently.
    pub fn cleanup(self) -> std::io::Result<()> {
        self.scratch.close()
    }
}
