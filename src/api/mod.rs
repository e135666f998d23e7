//! API layer
//!
//! HTTP handlers for the extension dashboard:
//! - Media queries, deletion and the export ledger
//! - Export/import of whole collections
//! - Thumbnail cache and background population
//! - Storage statistics
//! - Metrics (Prometheus)

mod dto;
mod media;
pub mod metrics;
mod stats;
mod thumbnails;
mod transfer;

pub use dto::*;

use axum::{Router, extract::State, response::Json, routing::get};

use crate::AppState;

pub use media::media_router;
pub use metrics::metrics_router;
pub use stats::stats_router;
pub use thumbnails::thumbnails_router;
pub use transfer::transfer_router;

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        initialized: state.db.is_initialized(),
    })
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
