use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, Instrument};

use super::IngestError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs ingestion jobs on a fixed number of workers.
///
/// At most `queue_size` jobs wait for a worker, submitting beyond that fails
/// right away with [`IngestError::QueueFull`]. Submitters still wait for
/// their own job to finish.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    send: mpsc::Sender<Job>,
}

impl IngestQueue {
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let (send, recv) = mpsc::channel::<Job>(queue_size.max(1));
        let recv = Arc::new(Mutex::new(recv));
        for worker in 0..workers.max(1) {
            let recv = recv.clone();
            tokio::spawn(
                async move {
                    loop {
                        // lock is only held while waiting for the next job
                        let job = recv.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!("ingest worker stopped");
                }
                .instrument(tracing::debug_span!("ingest_worker", worker)),
            );
        }
        IngestQueue { send }
    }

    /// Queues `fut` and waits for its result.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, IngestError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (send_result, recv_result) = oneshot::channel();
        let job: Job = Box::pin(
            async move {
                let _ = send_result.send(fut.await);
            }
            .in_current_span(),
        );
        self.send.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => IngestError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => IngestError::QueueClosed,
        })?;
        recv_result.await.map_err(|_| IngestError::QueueClosed)
    }
}
