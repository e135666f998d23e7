//! Data models
//!
//! Rust structs representing stored records and the typed vocabulary the
//! query engine speaks (collections, offsets, pages, export flags).
//! Timestamps are epoch milliseconds throughout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::str::FromStr;

use crate::error::StorageError;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Export Flags
// =============================================================================

/// Bitmask of export channels that have already consumed a record
///
/// Each export surface (URL list, user list, thumbnail archive, CSV, full
/// database dump) tracks its own "new" set through its own bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportFlags(u32);

impl ExportFlags {
    pub const NONE: Self = Self(0);
    pub const VIEWED: Self = Self(1 << 0);
    pub const URLS: Self = Self(1 << 1);
    pub const USERS: Self = Self(1 << 2);
    pub const THUMBNAILS: Self = Self(1 << 3);
    pub const CSV: Self = Self(1 << 4);
    pub const DB: Self = Self(1 << 5);
    /// Every export channel (VIEWED is not an export)
    pub const ALL_EXPORT: Self =
        Self(Self::URLS.0 | Self::USERS.0 | Self::THUMBNAILS.0 | Self::CSV.0 | Self::DB.0);

    /// Named constants, for collaborators building exclude masks
    pub const TABLE: [(&'static str, Self); 7] = [
        ("VIEWED", Self::VIEWED),
        ("URLS", Self::URLS),
        ("USERS", Self::USERS),
        ("THUMBNAILS", Self::THUMBNAILS),
        ("CSV", Self::CSV),
        ("DB", Self::DB),
        ("ALL_EXPORT", Self::ALL_EXPORT),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ExportFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExportFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ExportFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for ExportFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for ExportFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08b}", self.0)
    }
}

// =============================================================================
// Collections
// =============================================================================

/// The two logical record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Media,
    Thumbnails,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Thumbnails => "thumbnails",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(Self::Media),
            "thumbnails" => Ok(Self::Thumbnails),
            other => Err(StorageError::Validation(format!(
                "unknown collection: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Media
// =============================================================================

/// One scraped post/video
///
/// Serialized with the field names the extension has always used, so
/// records round-trip through the JSON interchange formats unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Stable identity, in practice the source URL
    pub id: String,
    pub user_id: String,
    /// e.g. "TikTok"
    pub platform: String,
    pub original_url: String,
    /// HTTP(S) URL, `data:` URI, or nothing
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub scraped_at: i64,
    #[serde(default)]
    pub export_flags: ExportFlags,
    /// Pre-bitmask boolean; read as ALL_EXPORT and dropped on write
    #[serde(rename = "exported", default, skip_serializing_if = "Option::is_none")]
    pub legacy_exported: Option<bool>,
    /// Any further scraper metadata (title, counters, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MediaRecord {
    /// Flags with the legacy boolean folded in
    pub fn effective_flags(&self) -> ExportFlags {
        if self.legacy_exported == Some(true) {
            self.export_flags | ExportFlags::ALL_EXPORT
        } else {
            self.export_flags
        }
    }

    /// Fold the legacy `exported` field into the bitmask and drop it.
    ///
    /// Returns `true` if the record changed.
    pub fn migrate_legacy(&mut self) -> bool {
        match self.legacy_exported.take() {
            Some(exported) => {
                if exported {
                    self.export_flags |= ExportFlags::ALL_EXPORT;
                }
                true
            }
            None => false,
        }
    }

    pub fn thumbnail(&self) -> ThumbnailRef<'_> {
        ThumbnailRef::classify(self.thumbnail_url.as_deref())
    }
}

/// How a media record's thumbnail reference should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailRef<'a> {
    /// HTTP(S) URL: resolvable and cacheable
    Valid(&'a str),
    /// Inline `data:` URI: a placeholder the scraper could not resolve
    DataUri,
    /// Missing, empty, or some other scheme
    Invalid,
}

impl<'a> ThumbnailRef<'a> {
    pub fn classify(thumbnail_url: Option<&'a str>) -> Self {
        let Some(raw) = thumbnail_url.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Invalid;
        };

        if is_data_uri(raw) {
            return Self::DataUri;
        }

        match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Self::Valid(raw),
            _ => Self::Invalid,
        }
    }

    pub fn valid_url(&self) -> Option<&'a str> {
        match self {
            Self::Valid(url) => Some(url),
            _ => None,
        }
    }
}

pub fn is_data_uri(value: &str) -> bool {
    value
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

/// Database row for `media`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaRow {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub original_url: String,
    pub thumbnail_url: Option<String>,
    pub scraped_at: i64,
    pub export_flags: i64,
    pub exported: Option<bool>,
    pub extra: Option<String>,
}

impl MediaRow {
    pub fn into_record(self) -> Result<MediaRecord, StorageError> {
        let extra = match self.extra.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => serde_json::Map::new(),
        };

        Ok(MediaRecord {
            id: self.id,
            user_id: self.user_id,
            platform: self.platform,
            original_url: self.original_url,
            thumbnail_url: self.thumbnail_url,
            scraped_at: self.scraped_at,
            export_flags: ExportFlags::from_bits(self.export_flags as u32),
            legacy_exported: self.exported,
            extra,
        })
    }
}

// =============================================================================
// Thumbnails
// =============================================================================

/// Cached fetch result for a thumbnail URL
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailEntry {
    /// Source thumbnail URL (primary key)
    pub url: String,
    pub payload: ThumbnailPayload,
    /// Epoch millis after which the entry must be refreshed
    pub ttl: i64,
}

/// What a fetch produced
#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailPayload {
    Image { bytes: Vec<u8>, content_type: String },
    /// Negative-cache entry: the last fetch failed
    Failed,
}

impl ThumbnailEntry {
    pub fn image(url: impl Into<String>, bytes: Vec<u8>, content_type: impl Into<String>, ttl: i64) -> Self {
        Self {
            url: url.into(),
            payload: ThumbnailPayload::Image {
                bytes,
                content_type: content_type.into(),
            },
            ttl,
        }
    }

    pub fn failed(url: impl Into<String>, ttl: i64) -> Self {
        Self {
            url: url.into(),
            payload: ThumbnailPayload::Failed,
            ttl,
        }
    }

    pub fn error(&self) -> bool {
        matches!(self.payload, ThumbnailPayload::Failed)
    }

    pub fn blob(&self) -> Option<&[u8]> {
        match &self.payload {
            ThumbnailPayload::Image { bytes, .. } => Some(bytes),
            ThumbnailPayload::Failed => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.payload {
            ThumbnailPayload::Image { content_type, .. } => Some(content_type),
            ThumbnailPayload::Failed => None,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.ttl
    }
}

/// Database row for `thumbnails`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ThumbnailRow {
    pub url: String,
    pub blob: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub ttl: i64,
    pub error: bool,
}

impl ThumbnailRow {
    pub fn into_entry(self) -> Result<ThumbnailEntry, StorageError> {
        let payload = match (self.error, self.blob) {
            (false, Some(bytes)) => ThumbnailPayload::Image {
                bytes,
                content_type: self
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            },
            (true, _) => ThumbnailPayload::Failed,
            (false, None) => {
                return Err(StorageError::Internal(anyhow::anyhow!(
                    "thumbnail row without blob is not marked as error: {}",
                    self.url
                )));
            }
        };

        Ok(ThumbnailEntry {
            url: self.url,
            payload,
            ttl: self.ttl,
        })
    }
}

// =============================================================================
// Collection-generic items and pagination
// =============================================================================

/// A record from either collection
#[derive(Debug, Clone, PartialEq)]
pub enum StoreItem {
    Media(MediaRecord),
    Thumbnail(ThumbnailEntry),
}

impl StoreItem {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Media(_) => Collection::Media,
            Self::Thumbnail(_) => Collection::Thumbnails,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Media(record) => &record.id,
            Self::Thumbnail(entry) => &entry.url,
        }
    }
}

/// Skip this many *matching* records (filtered queries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchOffset(pub u64);

/// Advance the raw cursor this many steps (unfiltered export)
///
/// Must equal the number of items already retrieved; it is relative to
/// store order, never to a filtered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawOffset(pub u64);

impl RawOffset {
    /// Offset for the page after one that returned `retrieved` items
    pub fn after(self, retrieved: usize) -> Self {
        Self(self.0 + retrieved as u64)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }
}

/// Outcome of a batched media upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub written: usize,
    /// Records left untouched to avoid a thumbnail downgrade
    pub preserved: usize,
}
