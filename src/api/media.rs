//! Media record endpoints

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{delete, post},
};

use super::dto::{
    CountResponse, DeleteMatchingRequest, DeletedResponse, IdsRequest, MarkExportedRequest,
    MarkExportedResponse, MediaQueryRequest, UsersResponse,
};
use crate::AppState;
use crate::data::{Collection, MediaCriteria, MediaRecord, Page, SaveReport};
use crate::error::StorageError;
use crate::metrics::HTTP_REQUESTS_TOTAL;

const DEFAULT_DELETE_BATCH: usize = 200;

/// Create media router
///
/// Routes:
/// - POST /api/media - Save a batch of records
/// - DELETE /api/media/:id - Delete one record
/// - POST /api/media/query - Filtered page of records
/// - POST /api/media/count - Count matching records
/// - POST /api/media/users - Distinct users
/// - POST /api/media/delete - Delete records by id
/// - POST /api/media/delete_matching - Delete every matching record
/// - POST /api/media/mark_exported - Record export channels
pub fn media_router() -> Router<AppState> {
    Router::new()
        .route("/", post(save_media))
        .route("/:id", delete(delete_media))
        .route("/query", post(query_media))
        .route("/count", post(count_media))
        .route("/users", post(unique_users))
        .route("/delete", post(delete_media_batch))
        .route("/delete_matching", post(delete_matching))
        .route("/mark_exported", post(mark_exported))
}

/// POST /api/media
async fn save_media(
    State(state): State<AppState>,
    Json(records): Json<Vec<MediaRecord>>,
) -> Result<Json<SaveReport>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media"])
        .inc();

    let report = state.db.put_all_media(&records).await?;
    Ok(Json(report))
}

/// DELETE /api/media/:id
async fn delete_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/media/:id"])
        .inc();

    if !state.db.delete(Collection::Media, &id).await? {
        return Err(StorageError::NotFound(format!("media {}", id)));
    }
    Ok(Json(DeletedResponse { deleted: 1 }))
}

/// POST /api/media/query
async fn query_media(
    State(state): State<AppState>,
    Json(request): Json<MediaQueryRequest>,
) -> Result<Json<Page<MediaRecord>>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/query"])
        .inc();

    let page = state
        .db
        .query_media(&request.criteria, request.offset, request.limit())
        .await?;
    Ok(Json(page))
}

/// POST /api/media/count
async fn count_media(
    State(state): State<AppState>,
    Json(criteria): Json<MediaCriteria>,
) -> Result<Json<CountResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/count"])
        .inc();

    let count = state.db.count_media(&criteria).await?;
    Ok(Json(CountResponse { count }))
}

/// POST /api/media/users
///
/// The `userId` filter is ignored so the list can feed a user picker.
async fn unique_users(
    State(state): State<AppState>,
    Json(criteria): Json<MediaCriteria>,
) -> Result<Json<UsersResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/users"])
        .inc();

    let users = state.db.get_unique_users(&criteria).await?;
    Ok(Json(UsersResponse { users }))
}

/// POST /api/media/delete
async fn delete_media_batch(
    State(state): State<AppState>,
    Json(request): Json<IdsRequest>,
) -> Result<Json<DeletedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/delete"])
        .inc();

    let deleted = state.db.delete_batch(Collection::Media, &request.ids).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /api/media/delete_matching
async fn delete_matching(
    State(state): State<AppState>,
    Json(request): Json<DeleteMatchingRequest>,
) -> Result<Json<DeletedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/delete_matching"])
        .inc();

    let batch_size = request.batch_size.unwrap_or(DEFAULT_DELETE_BATCH);
    let deleted = state.db.delete_matching(&request.criteria, batch_size).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /api/media/mark_exported
async fn mark_exported(
    State(state): State<AppState>,
    Json(request): Json<MarkExportedRequest>,
) -> Result<Json<MarkExportedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/media/mark_exported"])
        .inc();

    let updated = state.db.mark_as_exported(&request.ids, request.flags).await?;
    Ok(Json(MarkExportedResponse { updated }))
}
