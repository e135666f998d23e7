//! Dashboard API request and response DTOs

use serde::{Deserialize, Serialize};

use crate::data::{Collection, ExportFlags, MatchOffset, MediaCriteria, RawOffset};
use crate::storage::Resolution;
use crate::transfer::{ImportMode, ThumbnailRecord};

/// Default page size for media queries
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Largest page a single request may ask for
pub const MAX_PAGE_LIMIT: usize = 1000;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub initialized: bool,
}

// =============================================================================
// Media
// =============================================================================

/// POST /api/media/query
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaQueryRequest {
    pub criteria: MediaCriteria,
    /// Matching records to skip
    pub offset: MatchOffset,
    pub limit: Option<usize>,
}

impl MediaQueryRequest {
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

/// POST /api/media/delete_matching
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteMatchingRequest {
    pub criteria: MediaCriteria,
    pub batch_size: Option<usize>,
}

/// POST /api/media/mark_exported
#[derive(Debug, Deserialize)]
pub struct MarkExportedRequest {
    pub ids: Vec<String>,
    pub flags: ExportFlags,
}

#[derive(Debug, Serialize)]
pub struct MarkExportedResponse {
    pub updated: usize,
}

// =============================================================================
// Transfer
// =============================================================================

/// GET /api/export/:collection
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportPageParams {
    /// Items already retrieved by previous pages
    pub offset: RawOffset,
    pub limit: Option<usize>,
}

impl ExportPageParams {
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPageResponse {
    pub store: Collection,
    pub items: Vec<serde_json::Value>,
    pub has_more: bool,
    /// Offset to pass for the next page
    pub next_offset: RawOffset,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImportParams {
    pub mode: ImportMode,
}

// =============================================================================
// Thumbnails
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ThumbnailParams {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    /// hit, negative_hit, fetched, degraded, fetch_failed or invalid
    pub outcome: &'static str,
    pub entry: Option<ThumbnailRecord>,
}

impl From<&Resolution> for ResolveResponse {
    fn from(resolution: &Resolution) -> Self {
        let outcome = match resolution {
            Resolution::Hit(_) => "hit",
            Resolution::NegativeHit(_) => "negative_hit",
            Resolution::Fetched(_) => "fetched",
            Resolution::Degraded(_) => "degraded",
            Resolution::FetchFailed(_) => "fetch_failed",
            Resolution::Invalid => "invalid",
        };
        Self {
            outcome,
            entry: resolution.entry().map(ThumbnailRecord::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PopulateRequest {
    /// Continue after the last URL a stopped run processed
    pub resume: bool,
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsParams {
    pub force: bool,
}
