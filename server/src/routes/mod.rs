use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::app_state::SharedState;

pub mod api;
pub mod ingest;
pub mod playback;

/// Room for the text fields and multipart framing around an uploaded video.
pub const FORM_OVERHEAD: u64 = 64 * 1024;

pub fn router(max_upload_size: u64) -> Router<SharedState> {
    let body_limit = usize::try_from(max_upload_size.saturating_add(FORM_OVERHEAD))
        .unwrap_or(usize::MAX);
    Router::new()
        .route("/v/*id", get(playback::get_video))
        .route("/t/*id", get(playback::get_thumbnail))
        .route(
            "/upload",
            post(ingest::post_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/import", post(ingest::post_import))
        .nest("/api", api::router())
}
