use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use eyre::Context;
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, instrument};
use tube_core::{
    model::{Quality, Video, VideoId},
    streaming::{self, Playback, CONTENT_TYPE},
};

use crate::{
    app_state::SharedState,
    http_error::{ApiResult, HttpError},
};

const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=7776000";

#[derive(Debug, Deserialize)]
pub struct PlaybackQuery {
    #[serde(default)]
    quality: String,
}

fn lookup(app_state: &SharedState, id: &str) -> ApiResult<Video> {
    app_state
        .catalog
        .get(&VideoId::from(id))
        .ok_or_else(|| HttpError::not_found(format!("video {}", id)))
}

fn content_disposition(title: &str) -> ApiResult<HeaderValue> {
    let value = format!("attachment; filename=\"{}.mp4\"", title.replace('"', "'"));
    let value = HeaderValue::from_bytes(value.as_bytes())
        .wrap_err("error setting content-disposition header")?;
    Ok(value)
}

/// `GET /v/<id>.mp4?quality=<q>`
#[instrument(skip(app_state, request))]
pub async fn get_video(
    Path(id): Path<String>,
    Query(query): Query<PlaybackQuery>,
    State(app_state): State<SharedState>,
    request: Request,
) -> ApiResult<Response> {
    let id = id.strip_suffix(".mp4").unwrap_or(&id);
    let video = lookup(&app_state, id)?;
    let quality = Quality::from_query(&query.quality);
    let playback = streaming::select_playback(&video, quality, &app_state.sizes).await;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&video.title)?);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    match playback {
        Playback::File(path) => {
            debug!(%path, "serving file");
            let res = match ServeFile::new(&path).oneshot(request).await {
                Ok(res) => res,
                Err(never) => match never {},
            };
            let mut res = res.into_response();
            if res.status().is_success() {
                res.headers_mut().extend(headers);
                count_view(&app_state, &video).await;
            }
            Ok(res)
        }
        Playback::OnTheFly { input, size } => {
            let stream = streaming::stream_variant(
                app_state.encoder.as_ref(),
                &app_state.limiter,
                &input,
                &size,
            )?;
            count_view(&app_state, &video).await;
            Ok((headers, Body::from_stream(stream)).into_response())
        }
    }
}

async fn count_view(app_state: &SharedState, video: &Video) {
    let prefix = app_state
        .catalog
        .collection_for_path(&video.path)
        .map(|c| c.prefix)
        .unwrap_or_default();
    app_state.views.record_view(&prefix, &video.id).await;
}

/// `GET /t/<id>`
#[instrument(skip(app_state), level = "debug")]
pub async fn get_thumbnail(
    Path(id): Path<String>,
    State(app_state): State<SharedState>,
) -> ApiResult<Response> {
    let video = lookup(&app_state, &id)?;
    let content_type = HeaderValue::from_str(&video.thumbnail.mime_type)
        .wrap_err("error setting content-type header")?;
    let headers = [
        (header::CONTENT_TYPE, content_type),
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static(THUMBNAIL_CACHE_CONTROL),
        ),
    ];
    Ok((headers, video.thumbnail.data).into_response())
}
