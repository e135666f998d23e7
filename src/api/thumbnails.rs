//! Thumbnail cache endpoints

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use super::dto::{DeletedResponse, PopulateRequest, ResolveResponse, ThumbnailParams};
use crate::AppState;
use crate::data::{ThumbnailPayload, now_millis};
use crate::error::StorageError;
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::storage::PopulationState;

/// Create thumbnail router
///
/// Routes:
/// - GET /api/thumbnails?url= - Cached image bytes
/// - DELETE /api/thumbnails?url= - Drop a cache entry
/// - POST /api/thumbnails/resolve - Serve from cache or refetch
/// - POST /api/cache/populate - Start background population
/// - POST /api/cache/stop - Stop a running population
/// - GET /api/cache/status - Population progress
pub fn thumbnails_router() -> Router<AppState> {
    Router::new()
        .route("/thumbnails", get(get_thumbnail).delete(delete_thumbnail))
        .route("/thumbnails/resolve", post(resolve_thumbnail))
        .route("/cache/populate", post(start_population))
        .route("/cache/stop", post(stop_population))
        .route("/cache/status", get(population_status))
}

/// GET /api/thumbnails?url=
///
/// Only image entries are served; failure entries read as not found.
async fn get_thumbnail(
    State(state): State<AppState>,
    Query(params): Query<ThumbnailParams>,
) -> Result<Response, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/thumbnails"])
        .inc();

    let entry = state.thumbnails.get(&params.url).await?;
    match entry.map(|entry| entry.payload) {
        Some(ThumbnailPayload::Image {
            bytes,
            content_type,
        }) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response()),
        _ => Err(StorageError::NotFound(format!("thumbnail {}", params.url))),
    }
}

/// DELETE /api/thumbnails?url=
async fn delete_thumbnail(
    State(state): State<AppState>,
    Query(params): Query<ThumbnailParams>,
) -> Result<Json<DeletedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/thumbnails"])
        .inc();

    let deleted = state.thumbnails.delete(&params.url).await?;
    Ok(Json(DeletedResponse {
        deleted: deleted as u64,
    }))
}

/// POST /api/thumbnails/resolve
async fn resolve_thumbnail(
    State(state): State<AppState>,
    Json(params): Json<ThumbnailParams>,
) -> Result<Json<ResolveResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/thumbnails/resolve"])
        .inc();

    let resolution = state
        .thumbnails
        .resolve(&params.url, &state.fetcher, now_millis())
        .await?;
    Ok(Json(ResolveResponse::from(&resolution)))
}

/// POST /api/cache/populate
///
/// Returns 409 if a run is already in progress.
async fn start_population(
    State(state): State<AppState>,
    body: Option<Json<PopulateRequest>>,
) -> Result<(StatusCode, Json<PopulationState>), StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/cache/populate"])
        .inc();

    let request = body.map(|Json(request)| request).unwrap_or_default();
    state.populator.start(request.resume)?;
    let current = state.populator.state().await?;
    Ok((StatusCode::ACCEPTED, Json(current)))
}

/// POST /api/cache/stop
async fn stop_population(State(state): State<AppState>) -> StatusCode {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/cache/stop"])
        .inc();

    state.populator.stop();
    StatusCode::NO_CONTENT
}

/// GET /api/cache/status
async fn population_status(
    State(state): State<AppState>,
) -> Result<Json<PopulationState>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/cache/status"])
        .inc();

    Ok(Json(state.populator.state().await?))
}
