//! Storage statistics endpoints

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::{get, post},
};

use super::dto::StatsParams;
use crate::AppState;
use crate::error::StorageError;
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::stats::{DetailedStats, StatsProgress, StorageUsage};

/// Create stats router
///
/// Routes:
/// - GET /api/stats?force= - Fast snapshot, merged with detailed totals
/// - POST /api/stats/detailed - Run the detailed scan now
/// - GET /api/stats/progress - Detailed scan progress
pub fn stats_router() -> Router<AppState> {
    Router::new()
        .route("/", get(storage_usage))
        .route("/detailed", post(detailed_stats))
        .route("/progress", get(progress))
}

/// GET /api/stats
async fn storage_usage(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StorageUsage>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/stats"])
        .inc();

    let usage = state.stats.get_storage_usage(params.force).await?;
    Ok(Json(usage))
}

/// POST /api/stats/detailed
///
/// Waits for the scan; concurrent callers share one computation.
async fn detailed_stats(
    State(state): State<AppState>,
) -> Result<Json<DetailedStats>, StorageError> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/stats/detailed"])
        .inc();

    let detailed = state.stats.calculate_detailed_stats().await?;
    Ok(Json(detailed))
}

/// GET /api/stats/progress
async fn progress(State(state): State<AppState>) -> Json<StatsProgress> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/stats/progress"])
        .inc();

    Json(state.stats.progress())
}
