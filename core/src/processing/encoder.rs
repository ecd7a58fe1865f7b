use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8Path as Path;

use super::process::{ProcessError, StreamingProcess};

/// Title and description embedded into produced containers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodeMetadata {
    pub title: String,
    pub description: String,
}

/// The encoder operations the ingestion pipeline and the on the fly
/// transcoder need. `FFmpeg` is the real implementation.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Normalize `input` into an H.264/AAC MP4 at `output`.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> Result<(), ProcessError>;

    /// Extract one frame `offset` into `input` as a JPEG.
    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        offset: Duration,
        timeout: Duration,
    ) -> Result<(), ProcessError>;

    /// Downscaled H.264/AAC MP4 with ffmpeg frame size `size`.
    async fn scale(
        &self,
        input: &Path,
        output: &Path,
        size: &str,
        metadata: &EncodeMetadata,
        timeout: Duration,
    ) -> Result<(), ProcessError>;

    /// Downscaled fragmented MP4 written to the stdout of the returned process.
    fn stream_scaled(&self, input: &Path, size: &str) -> Result<StreamingProcess, ProcessError>;
}
