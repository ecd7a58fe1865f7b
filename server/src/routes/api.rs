use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tube_core::model::{self, Collection, SortBy, Video, VideoId};

use crate::{
    app_state::SharedState,
    http_error::{ApiResult, HttpError},
};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/playlist", get(get_playlist))
        .route("/video/*id", get(get_video_info))
        .route("/collections", get(get_collections))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    #[serde(default)]
    sort: String,
}

#[tracing::instrument(skip(app_state), level = "debug")]
async fn get_playlist(
    Query(query): Query<PlaylistQuery>,
    State(app_state): State<SharedState>,
) -> Json<Vec<Video>> {
    let mut playlist = app_state.catalog.playlist();
    app_state.views.merge_views(&mut playlist).await;
    model::sort_playlist(&mut playlist, SortBy::from_query(&query.sort));
    Json(playlist)
}

#[tracing::instrument(skip(app_state), level = "debug")]
async fn get_video_info(
    Path(id): Path<String>,
    State(app_state): State<SharedState>,
) -> ApiResult<Json<Video>> {
    let id = VideoId::from(id);
    let mut video = app_state
        .catalog
        .get(&id)
        .ok_or_else(|| HttpError::not_found(format!("video {}", id)))?;
    video.views = app_state.views.get_views(&id).await;
    Ok(Json(video))
}

async fn get_collections(State(app_state): State<SharedState>) -> Json<Vec<Collection>> {
    Json(app_state.catalog.collections())
}
