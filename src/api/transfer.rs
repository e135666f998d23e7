//! Export, import and store maintenance endpoints

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
};

use super::dto::{DeletedResponse, ExportPageParams, ExportPageResponse, ImportParams};
use crate::AppState;
use crate::data::Collection;
use crate::error::StorageError;
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::transfer::{self, ExportEnvelope, ImportPayload, ImportReport, encode_item};

/// Create transfer router
///
/// Routes:
/// - GET /api/export/:collection - One raw page
/// - GET /api/export/:collection/all - Full dump envelope
/// - POST /api/import/:collection - Import a dump or record array
/// - DELETE /api/stores/:collection - Clear a collection
pub fn transfer_router() -> Router<AppState> {
    Router::new()
        .route("/export/:collection", get(export_page))
        .route("/export/:collection/all", get(export_all))
        .route("/import/:collection", post(import))
        .route("/stores/:collection", delete(clear_store))
}

fn parse_collection(raw: &str) -> Result<Collection, StorageError> {
    raw.parse::<Collection>()
        .map_err(|_| StorageError::NotFound(format!("collection {}", raw)))
}

/// GET /api/export/:collection
async fn export_page(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ExportPageParams>,
) -> Result<Json<ExportPageResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/export/:collection"])
        .inc();

    let collection = parse_collection(&collection)?;
    let page = state
        .db
        .export_store(collection, params.offset, params.limit())
        .await?;

    let items = page
        .items
        .iter()
        .map(encode_item)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ExportPageResponse {
        store: collection,
        next_offset: params.offset.after(items.len()),
        has_more: page.has_more,
        items,
    }))
}

/// GET /api/export/:collection/all
async fn export_all(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<ExportEnvelope>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/export/:collection/all"])
        .inc();

    let collection = parse_collection(&collection)?;
    let envelope =
        transfer::export_all(&state.db, collection, state.config.transfer.page_size).await?;
    Ok(Json(envelope))
}

/// POST /api/import/:collection?mode=overwrite|skip|merge
async fn import(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ImportParams>,
    Json(payload): Json<ImportPayload>,
) -> Result<Json<ImportReport>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/import/:collection"])
        .inc();

    let collection = parse_collection(&collection)?;
    let report = transfer::import(&state.db, collection, payload, params.mode).await?;
    Ok(Json(report))
}

/// DELETE /api/stores/:collection
async fn clear_store(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<DeletedResponse>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/stores/:collection"])
        .inc();

    let collection = parse_collection(&collection)?;
    let deleted = state.db.clear(collection).await?;
    tracing::warn!(collection = %collection, deleted, "Collection cleared");
    Ok(Json(DeletedResponse { deleted }))
}
