use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap},
};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};
use tube_core::ingest::IngestError;

use super::FORM_OVERHEAD;
use crate::{
    app_state::SharedState,
    http_error::{ApiResult, HttpError},
};

/// Video size the client announced, going by the request's content length.
fn announced_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(|len| len.saturating_sub(FORM_OVERHEAD))
}

/// `POST /upload`, a multipart form with `video_title`, `video_description`,
/// `target_library_path` and `video_file`. The text fields have to come
/// before the file, the file is staged while it is being received.
#[tracing::instrument(skip_all)]
pub async fn post_upload(
    State(app_state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<&'static str> {
    let mut title = String::new();
    let mut description = String::new();
    let mut target: Option<String> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "video_title" => title = field.text().await?,
            "video_description" => description = field.text().await?,
            "target_library_path" => target = Some(field.text().await?),
            "video_file" => {
                let target = target
                    .take()
                    .ok_or(IngestError::InvalidCollection(Utf8PathBuf::new()))?;
                let filename = field.file_name().map(str::to_owned);
                let report = app_state
                    .ingester
                    .ingest_upload(
                        field,
                        filename.as_deref(),
                        &title,
                        &description,
                        Utf8Path::new(&target),
                        announced_size(&headers),
                    )
                    .await?;
                info!(basename = %report.basename, "video uploaded");
                return Ok("Video successfully uploaded!");
            }
            other => debug!(field = other, "ignoring form field"),
        }
    }
    Err(IngestError::MissingPayload.into())
}

/// `POST /import`, a form with `url` and optionally `target_library_path`.
#[tracing::instrument(skip_all)]
pub async fn post_import(
    State(app_state): State<SharedState>,
    mut multipart: Multipart,
) -> ApiResult<&'static str> {
    let mut url = String::new();
    let mut target: Option<String> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "url" => url = field.text().await?,
            "target_library_path" => target = Some(field.text().await?),
            other => debug!(field = other, "ignoring form field"),
        }
    }
    let url = url.trim();
    if url.is_empty() {
        return Err(HttpError::bad_request("no url supplied"));
    }
    let target = target.filter(|t| !t.is_empty());
    let report = app_state
        .ingester
        .ingest_import(url, target.as_deref().map(Utf8Path::new))
        .await?;
    info!(%url, basename = %report.basename, "video imported");
    Ok("Video successfully imported!")
}
