use std::{collections::BTreeMap, time::Duration};

use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use tracing::{info, instrument, warn};

use super::{
    naming::{self, NameReservations},
    IngestError, IngestStage, PendingIngestion,
};
use crate::{
    catalog::id::DERIVATIVE_SEPARATOR,
    processing::{encoder::EncodeMetadata, encoder::MediaEncoder, process::ProcessError},
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub transcode_timeout: Duration,
    pub thumbnail_timeout: Duration,
    pub thumbnail_offset: Duration,
    /// ffmpeg frame size -> derivative suffix
    pub sizes: BTreeMap<String, String>,
    /// Keep client filenames for every collection
    pub preserve_upload_filename: bool,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub basename: String,
    /// Files renamed into the collection, in order
    pub published: Vec<PathBuf>,
    pub derivatives: Vec<PathBuf>,
    /// Suffixes of derivatives that could not be produced
    pub failed_derivatives: Vec<String>,
}

impl IngestReport {
    pub fn master(&self) -> Option<&Path> {
        self.published.last().map(|p| p.as_path())
    }
}

/// Runs transcode, thumbnail, publish and derivatives for a staged source.
///
/// Any failure up to and including publishing fails the ingestion. Derivative
/// failures are only recorded in the report, the master stays published.
#[instrument(skip_all, fields(source = %pending.source, target = %pending.target.path))]
pub async fn run_pipeline(
    encoder: &dyn MediaEncoder,
    settings: &PipelineSettings,
    names: &NameReservations,
    pending: PendingIngestion,
) -> Result<IngestReport, IngestError> {
    let res = run_stages(encoder, settings, names, &pending).await;
    match &res {
        Ok(report) => info!(stage = %IngestStage::Done, basename = %report.basename, "ingestion finished"),
        Err(err) => warn!(stage = %IngestStage::Failed, "ingestion failed: {}", err),
    }
    if let Err(err) = pending.cleanup() {
        warn!("could not remove scratch directory: {}", err);
    }
    res
}

async fn run_stages(
    encoder: &dyn MediaEncoder,
    settings: &PipelineSettings,
    names: &NameReservations,
    pending: &PendingIngestion,
) -> Result<IngestReport, IngestError> {
    let collection = &pending.target;
    let scratch = pending.scratch_dir();
    let preserve = settings.preserve_upload_filename || collection.preserve_upload_filename;
    let desired = naming::desired_basename(pending.original_filename.as_deref(), preserve);
    // the name stays reserved until this returns
    let reservation = naming::resolve_basename(&desired, &collection.path, names)
        .await
        .map_err(IngestError::Stage)?;
    let basename = reservation.basename().to_owned();
    let metadata = EncodeMetadata {
        title: pending.title.clone(),
        description: pending.description.clone(),
    };

    info!(stage = %IngestStage::Transcoding, %basename);
    let master_scratch = scratch.join(format!("{basename}.mp4"));
    encoder
        .transcode(
            &pending.source,
            &master_scratch,
            &metadata,
            settings.transcode_timeout,
        )
        .await
        .map_err(|err| match err {
            ProcessError::Timeout { timeout, .. } => IngestError::TranscodeTimeout(timeout),
            source => IngestError::Process {
                stage: IngestStage::Transcoding,
                source,
            },
        })?;
    expect_output(IngestStage::Transcoding, &master_scratch).await?;

    info!(stage = %IngestStage::Thumbnailing);
    let thumb_scratch = scratch.join(format!("{basename}.jpg"));
    let mut have_thumbnail = false;
    if let Some(fetched) = &pending.thumbnail {
        match tokio::fs::rename(fetched, &thumb_scratch).await {
            Ok(()) => have_thumbnail = true,
            Err(err) => warn!("could not use fetched thumbnail, extracting a frame: {}", err),
        }
    }
    if !have_thumbnail {
        encoder
            .thumbnail(
                &pending.source,
                &thumb_scratch,
                settings.thumbnail_offset,
                settings.thumbnail_timeout,
            )
            .await
            .map_err(|source| IngestError::Process {
                stage: IngestStage::Thumbnailing,
                source,
            })?;
    }
    expect_output(IngestStage::Thumbnailing, &thumb_scratch).await?;

    // the thumbnail goes first so it is in place when the video shows up
    info!(stage = %IngestStage::Publishing);
    let thumb_dest = collection.path.join(format!("{basename}.jpg"));
    let master_dest = collection.path.join(format!("{basename}.mp4"));
    publish(&thumb_scratch, &thumb_dest).await?;
    publish(&master_scratch, &master_dest).await?;

    let mut report = IngestReport {
        basename: basename.clone(),
        published: vec![thumb_dest, master_dest],
        derivatives: Vec::new(),
        failed_derivatives: Vec::new(),
    };
    if !settings.sizes.is_empty() {
        info!(stage = %IngestStage::Deriving, count = settings.sizes.len());
    }
    for (size, suffix) in &settings.sizes {
        let name = format!("{basename}{DERIVATIVE_SEPARATOR}{suffix}.mp4");
        let staged = scratch.join(&name);
        let dest = collection.path.join(&name);
        let res = async {
            encoder
                .scale(
                    &pending.source,
                    &staged,
                    size,
                    &metadata,
                    settings.transcode_timeout,
                )
                .await
                .map_err(|source| IngestError::Process {
                    stage: IngestStage::Deriving,
                    source,
                })?;
            expect_output(IngestStage::Deriving, &staged).await?;
            publish(&staged, &dest).await
        }
        .await;
        match res {
            Ok(()) => report.derivatives.push(dest),
            Err(err) => {
                warn!(%size, %suffix, "could not create derivative: {}", err);
                report.failed_derivatives.push(suffix.clone());
            }
        }
    }
    Ok(report)
}

async fn expect_output(stage: IngestStage, path: &Path) -> Result<(), IngestError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(IngestError::MissingOutput {
            stage,
            path: path.to_owned(),
        }),
    }
}

async fn publish(from: &Path, to: &Path) -> Result<(), IngestError> {
    tracing::debug!(%from, %to, "publishing");
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| IngestError::PublishFailed {
            from: from.to_owned(),
            to: to.to_owned(),
            source,
        })
}
