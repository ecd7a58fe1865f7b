use std::time::Duration;

use camino::Utf8PathBuf as PathBuf;

use super::IngestStage;
use crate::processing::process::ProcessError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no collection with path {0}")]
    InvalidCollection(PathBuf),
    #[error("request does not contain a video")]
    MissingPayload,
    #[error("video size of {size} bytes exceeds the maximum of {max} bytes")]
    SizeExceeded { size: u64, max: u64 },
    #[error("error staging video")]
    Stage(#[source] std::io::Error),
    #[error("could not resolve video info for {url}: {reason}")]
    Resolve { url: String, reason: String },
    #[error("error downloading {url}")]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("transcoding did not finish within {0:?}")]
    TranscodeTimeout(Duration),
    #[error("{stage} failed")]
    Process {
        stage: IngestStage,
        #[source]
        source: ProcessError,
    },
    #[error("{stage} did not produce {path}")]
    MissingOutput { stage: IngestStage, path: PathBuf },
    #[error("error moving {from} to {to}")]
    PublishFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("too many ingestions in progress")]
    QueueFull,
    #[error("ingestion queue is shut down")]
    QueueClosed,
}

/// Coarse classification for callers that only need to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum IngestErrorKind {
    /// Bad request, nothing was touched
    Validation,
    /// An encoder run failed or timed out
    Process,
    /// Moving results into the collection failed, the thumbnail may already be there
    Publish,
    /// Try again later
    Overloaded,
    Internal,
}

impl IngestError {
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            IngestError::InvalidCollection(_)
            | IngestError::MissingPayload
            | IngestError::SizeExceeded { .. } => IngestErrorKind::Validation,
            IngestError::TranscodeTimeout(_)
            | IngestError::Process { .. }
            | IngestError::MissingOutput { .. } => IngestErrorKind::Process,
            IngestError::PublishFailed { .. } => IngestErrorKind::Publish,
            IngestError::QueueFull => IngestErrorKind::Overloaded,
            IngestError::Stage(_)
            | IngestError::Resolve { .. }
            | IngestError::Download { .. }
            | IngestError::QueueClosed => IngestErrorKind::Internal,
        }
    }
}
