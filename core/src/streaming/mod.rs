use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::processing::process::ProcessError;

mod otf;

pub use otf::{select_playback, stream_variant, Playback, TranscodeStream, CONTENT_TYPE};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("too many on the fly transcodes running")]
    Busy,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Bounds the number of encoders started for playback requests.
#[derive(Debug, Clone)]
pub struct TranscodeLimiter {
    permits: Arc<Semaphore>,
}

impl TranscodeLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        TranscodeLimiter {
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Never waits, a request that finds every slot taken is turned away.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, StreamError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| StreamError::Busy)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
