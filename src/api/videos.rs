//! Session recording endpoints.
//!
//! Listing never fails: scan problems degrade to an empty list with an
//! `error` field. Serving answers 404 for anything that does not resolve to
//! a recording inside the videos root.

use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::io::ReaderStream;

use super::routes::AppState;
use super::types::{ErrorResponse, VideoListResponse};
use crate::recordings::{latest_in_progress, ArtifactError, ArtifactScanError};
use crate::util::is_safe_path_segment;

/// Recordings are only linked once the session stopped recording, so
/// served files never change.
const CACHE_CONTROL: &str = "public, max-age=3600";
const CONTENT_TYPE: &str = "video/webm";

pub async fn list_videos(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<VideoListResponse> {
    if !is_safe_path_segment(&session_id) {
        return Json(VideoListResponse::degraded(format!(
            "Invalid session id: {:?}",
            session_id
        )));
    }

    let monitor = state.monitor.clone();
    let scan = tokio::task::spawn_blocking(move || {
        let videos = monitor.store().list_artifacts(&session_id)?;
        let is_recording = latest_in_progress(&videos, SystemTime::now());
        Ok::<_, ArtifactScanError>((videos, is_recording))
    })
    .await;

    match scan {
        Ok(Ok((videos, is_recording))) => Json(VideoListResponse {
            total_count: videos.len(),
            videos,
            is_recording,
            error: None,
        }),
        Ok(Err(e)) => {
            tracing::warn!("Video listing degraded: {}", e);
            Json(VideoListResponse::degraded(e.to_string()))
        }
        Err(e) => {
            tracing::error!("Video listing task failed: {}", e);
            Json(VideoListResponse::degraded(e.to_string()))
        }
    }
}

pub async fn serve_video(
    State(state): State<Arc<AppState>>,
    Path((session_id, timestamp, filename)): Path<(String, String, String)>,
) -> Response {
    let path = match state
        .monitor
        .resolve_artifact(&session_id, &timestamp, &filename)
    {
        Ok(path) => path,
        Err(ArtifactError::NotFound) => return not_found(),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return not_found(),
        Err(e) => return internal_error(e.to_string()),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    if let Ok(metadata) = file.metadata().await {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    }

    let body = Body::from_stream(ReaderStream::new(file));
    (headers, body).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(ArtifactError::NotFound.to_string())),
    )
        .into_response()
}

fn internal_error(message: String) -> Response {
    tracing::error!("Failed to serve video: {}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(message)),
    )
        .into_response()
}
