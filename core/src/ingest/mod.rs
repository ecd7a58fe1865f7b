use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use futures::Stream;
use tracing::{info, instrument, warn};

use crate::{catalog::Catalog, config::Config, model::Collection, processing::encoder::MediaEncoder};

mod error;
pub mod import;
pub mod naming;
mod pipeline;
mod queue;
mod stage;
pub mod upload;

pub use error::{BoxError, IngestError, IngestErrorKind};
pub use import::{DirectUrlResolver, Downloader, VideoInfo, VideoInfoResolver};
pub use pipeline::{IngestReport, PipelineSettings};
pub use queue::IngestQueue;
pub use stage::{IngestStage, PendingIngestion};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Parent of the per ingestion scratch directories
    pub scratch_root: PathBuf,
    pub max_upload_size: u64,
    pub pipeline: PipelineSettings,
    pub workers: usize,
    pub queue_size: usize,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        IngestSettings {
            scratch_root: config.server.upload_path.clone(),
            max_upload_size: config.server.max_upload_size,
            pipeline: PipelineSettings {
                transcode_timeout: config.transcoder.timeout,
                thumbnail_timeout: config.thumbnailer.timeout,
                thumbnail_offset: config.thumbnailer.position_from_start,
                sizes: config.transcoder.sizes.clone(),
                preserve_upload_filename: config.server.preserve_upload_filename,
            },
            workers: config.transcoder.workers,
            queue_size: config.transcoder.queue_size,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            scratch_root: PathBuf::from("uploads"),
            max_upload_size: 100 * 1024 * 1024,
            pipeline: PipelineSettings {
                transcode_timeout: Duration::from_secs(300),
                thumbnail_timeout: Duration::from_secs(60),
                thumbnail_offset: Duration::from_secs(3),
                sizes: BTreeMap::new(),
                preserve_upload_filename: false,
            },
            workers: 1,
            queue_size: 8,
        }
    }
}

/// Entry points for getting new videos into a collection.
///
/// Both return once the video is published or the ingestion failed, the
/// catalog picks the published files up through its filesystem watcher.
#[derive(Clone)]
pub struct Ingester {
    inner: Arc<IngesterInner>,
}

struct IngesterInner {
    catalog: Catalog,
    encoder: Arc<dyn MediaEncoder>,
    resolver: Arc<dyn VideoInfoResolver>,
    downloader: Downloader,
    queue: IngestQueue,
    names: naming::NameReservations,
    settings: IngestSettings,
}

impl Ingester {
    /// Starts the ingest workers, so must be called within a tokio runtime.
    pub fn new(
        catalog: Catalog,
        encoder: Arc<dyn MediaEncoder>,
        resolver: Arc<dyn VideoInfoResolver>,
        downloader: Downloader,
        settings: IngestSettings,
    ) -> Self {
        let queue = IngestQueue::new(settings.workers, settings.queue_size);
        Ingester {
            inner: Arc::new(IngesterInner {
                catalog,
                encoder,
                resolver,
                downloader,
                queue,
                names: Default::default(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.inner.settings
    }

    fn target_collection(&self, target: &Path) -> Result<Collection, IngestError> {
        self.inner
            .catalog
            .collection(target)
            .ok_or_else(|| IngestError::InvalidCollection(target.to_owned()))
    }

    /// Ingests an uploaded byte stream. `size_hint` is the size the client
    /// announced, if any.
    #[instrument(skip(self, stream, description), fields(target = %target))]
    pub async fn ingest_upload<S, E>(
        &self,
        stream: S,
        filename: Option<&str>,
        title: &str,
        description: &str,
        target: &Path,
        size_hint: Option<u64>,
    ) -> Result<IngestReport, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let collection = self.target_collection(target)?;
        let max = self.inner.settings.max_upload_size;
        upload::check_size_hint(size_hint, max)?;
        info!(stage = %IngestStage::Staging);
        let mut pending = PendingIngestion::create(
            &self.inner.settings.scratch_root,
            collection,
            &upload::staged_source_name(filename),
        )?;
        let size = upload::copy_capped(stream, &pending.source, max).await?;
        if size == 0 {
            return Err(IngestError::MissingPayload);
        }
        pending.title = title.to_owned();
        pending.description = description.to_owned();
        pending.original_filename = filename.map(str::to_owned);
        self.submit(pending).await
    }

    /// Resolves `url`, downloads the video and ingests it into `target`, or
    /// into the first collection when no target is given.
    #[instrument(skip(self))]
    pub async fn ingest_import(
        &self,
        url: &str,
        target: Option<&Path>,
    ) -> Result<IngestReport, IngestError> {
        let collection = match target {
            Some(target) => self.target_collection(target)?,
            None => self
                .inner
                .catalog
                .collections()
                .into_iter()
                .next()
                .ok_or_else(|| IngestError::InvalidCollection(PathBuf::new()))?,
        };
        let info = self
            .inner
            .resolver
            .resolve(url)
            .await
            .map_err(|err| IngestError::Resolve {
                url: url.to_owned(),
                reason: format!("{:#}", err),
            })?;
        let max = self.inner.settings.max_upload_size;
        let downloader = &self.inner.downloader;
        let size_hint = downloader.content_length(&info.video_url).await?;
        upload::check_size_hint(size_hint, max)?;

        info!(stage = %IngestStage::Staging, video_url = %info.video_url);
        let mut pending = PendingIngestion::create(
            &self.inner.settings.scratch_root,
            collection,
            "source.mp4",
        )?;
        downloader
            .download(&info.video_url, &pending.source, max)
            .await?;
        if let Some(thumbnail_url) = &info.thumbnail_url {
            let dest = pending.scratch_dir().join("fetched-thumbnail.jpg");
            match downloader.download(thumbnail_url, &dest, max).await {
                Ok(_) => pending.thumbnail = Some(dest),
                Err(err) => warn!("could not download thumbnail, extracting a frame: {}", err),
            }
        }
        pending.title = info.title;
        pending.description = info.description;
        self.submit(pending).await
    }

    async fn submit(&self, pending: PendingIngestion) -> Result<IngestReport, IngestError> {
        let inner = self.inner.clone();
        self.inner
            .queue
            .run(async move {
                pipeline::run_pipeline(
                    inner.encoder.as_ref(),
                    &inner.settings.pipeline,
                    &inner.names,
                    pending,
                )
                .await
            })
            .await?
    }
}

#[cfg(test)]
mod test;
