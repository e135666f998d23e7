//! ScrapeVault - local storage engine for scraped social media metadata
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Dashboard endpoints (media, transfer, thumbnails, stats) │
//! │  - Prometheus metrics                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Thumbnails / Stats / Transfer                   │
//! │  - TTL thumbnail cache, fetcher, population job             │
//! │  - Two-tier storage statistics                              │
//! │  - Full-collection export and import                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite record store (sqlx)                               │
//! │  - Cursor query engine                                      │
//! │  - Export-flag ledger                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for the extension dashboard
//! - `data`: Record store, queries and the export ledger
//! - `storage`: Thumbnail cache, fetching and recompression
//! - `stats`: Storage statistics aggregator
//! - `transfer`: Bulk export and import
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod stats;
pub mod storage;
pub mod transfer;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Record store
    pub db: Arc<data::Database>,

    /// Thumbnail cache over the store
    pub thumbnails: storage::ThumbnailCache,

    /// Network thumbnail fetcher
    pub fetcher: Arc<storage::HttpThumbnailFetcher>,

    /// Storage statistics
    pub stats: Arc<stats::StatsAggregator>,

    /// Background cache population job
    pub populator: Arc<storage::CachePopulator<storage::HttpThumbnailFetcher>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Open and migrate the SQLite database
    /// 2. Build the thumbnail fetcher and cache
    /// 3. Build the statistics aggregator and population job
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or the HTTP client
    /// cannot be built
    pub async fn new(config: config::AppConfig) -> Result<Self, error::StorageError> {
        tracing::info!("Initializing application state...");

        // 1. Open database
        let db = data::Database::new(
            config.database.path.clone(),
            data::DatabaseOptions::from(&config.database),
        );
        db.init().await?;
        let db = Arc::new(db);
        tracing::info!(path = %config.database.path.display(), "Database connected");

        // 2. Thumbnails
        let fetcher = storage::HttpThumbnailFetcher::new(&config.thumbnails)
            .map_err(|e| error::StorageError::Internal(e.into()))?;
        let fetcher = Arc::new(fetcher);
        let thumbnails = storage::ThumbnailCache::new(db.clone(), config.thumbnails.clone());

        // 3. Stats and background jobs
        let stats = Arc::new(stats::StatsAggregator::new(db.clone(), config.stats.clone()));
        let populator = Arc::new(storage::CachePopulator::new(
            db.clone(),
            thumbnails.clone(),
            fetcher.clone(),
            Duration::from_millis(config.thumbnails.fetch_delay_ms),
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            thumbnails,
            fetcher,
            stats,
            populator,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use axum::extract::DefaultBodyLimit;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    let cors_layer = build_cors_layer(&state.config.server);
    let body_limit = state.config.transfer.max_import_bytes;

    let api = Router::new()
        .nest("/media", api::media_router())
        .nest("/stats", api::stats_router())
        .merge(api::transfer_router())
        .merge(api::thumbnails_router());

    Router::new()
        .merge(api::health_router())
        .nest("/api", api)
        .merge(api::metrics_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Restrict cross-origin access to the configured dashboard origin.
///
/// Without one the API is reachable from any origin; it is expected to bind
/// to loopback only.
fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    let Some(allowed_origin) = server.allowed_origin.as_deref() else {
        return CorsLayer::permissive();
    };

    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse allowed CORS origin; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}
