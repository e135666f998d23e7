//! Prometheus scrape endpoint

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::data::Collection;
use crate::metrics::{RECORDS_TOTAL, REGISTRY};

/// GET /metrics
///
/// Record gauges are refreshed from the store before encoding. A store that
/// cannot be counted keeps its last values.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    for collection in [Collection::Media, Collection::Thumbnails] {
        match state.db.count(collection).await {
            Ok(count) => RECORDS_TOTAL
                .with_label_values(&[collection.as_str()])
                .set(count as i64),
            Err(e) => tracing::debug!(error = %e, collection = %collection, "Skipping record gauge"),
        }
    }

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
