use std::{
    collections::BTreeMap,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use futures::Stream;
use tokio::{process::ChildStdout, sync::OwnedSemaphorePermit};
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};

use super::{StreamError, TranscodeLimiter};
use crate::{
    model::{Quality, Video},
    processing::{
        encoder::MediaEncoder,
        process::{ProcessError, StreamingProcess},
    },
};

pub const CONTENT_TYPE: &str = "video/mp4";

/// Where the bytes for a playback request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    File(PathBuf),
    /// The derivative does not exist, encode `input` to `size` while sending
    OnTheFly { input: PathBuf, size: String },
}

/// Picks the master, an existing derivative, or an on the fly encode of the
/// master. `sizes` maps ffmpeg sizes to derivative suffixes.
pub async fn select_playback(
    video: &Video,
    quality: Option<Quality>,
    sizes: &BTreeMap<String, String>,
) -> Playback {
    let Some(quality) = quality else {
        return Playback::File(video.path.clone());
    };
    let suffix = quality.as_ref();
    let derivative = video.derivative_path(suffix);
    if let Ok(true) = tokio::fs::try_exists(&derivative).await {
        return Playback::File(derivative);
    }
    let size = sizes
        .iter()
        .find(|(_, s)| s.as_str() == suffix)
        .map(|(size, _)| size.clone())
        .unwrap_or_else(|| quality.default_size().to_owned());
    tracing::warn!(%derivative, %quality, "derivative missing, encoding on the fly");
    Playback::OnTheFly {
        input: video.path.clone(),
        size,
    }
}

/// Encoder output as a byte stream.
///
/// Holds the encoder process and an admission permit. Dropping the stream,
/// which is what happens when the client goes away, kills the encoder and
/// frees the permit.
pub struct TranscodeStream {
    inner: ReaderStream<ChildStdout>,
    process: StreamingProcess,
    _permit: OwnedSemaphorePermit,
}

impl TranscodeStream {
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }
}

impl std::fmt::Debug for TranscodeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeStream")
            .field("program", &self.process.program())
            .field("pid", &self.process.id())
            .finish()
    }
}

impl Stream for TranscodeStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

#[instrument(skip(encoder, limiter))]
pub fn stream_variant(
    encoder: &dyn MediaEncoder,
    limiter: &TranscodeLimiter,
    input: &Path,
    size: &str,
) -> Result<TranscodeStream, StreamError> {
    let permit = limiter.try_acquire()?;
    let mut process = encoder.stream_scaled(input, size)?;
    let stdout = process.take_stdout().ok_or_else(|| ProcessError::Io {
        program: process.program().to_owned(),
        source: std::io::Error::other("encoder stdout already taken"),
    })?;
    info!(pid = ?process.id(), "started on the fly encode");
    Ok(TranscodeStream {
        inner: ReaderStream::new(stdout),
        process,
        _permit: permit,
    })
}
