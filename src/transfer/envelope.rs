//! JSON interchange formats

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::data::{Collection, MediaRecord, StoreItem, ThumbnailEntry, ThumbnailPayload};
use crate::error::StorageError;

/// `type` tag written into every full-collection dump
pub const EXPORT_TYPE: &str = "scrapevault-export";

/// Full-collection dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub store: Collection,
    #[serde(default)]
    pub exported_at: Option<i64>,
    pub items: Vec<serde_json::Value>,
}

/// Accepted import bodies: a dump envelope or a bare array of records
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImportPayload {
    Envelope(ExportEnvelope),
    Items(Vec<serde_json::Value>),
}

/// How imported records treat existing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Always replace
    #[default]
    Overwrite,
    /// Keep the existing record
    Skip,
    /// Same as overwrite for a key-value store
    Merge,
}

/// Thumbnail entry as it appears in interchange files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRecord {
    pub url: String,
    /// Base64 payload, absent for failure entries
    #[serde(default)]
    pub blob: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    pub ttl: i64,
    #[serde(default)]
    pub error: bool,
}

impl From<&ThumbnailEntry> for ThumbnailRecord {
    fn from(entry: &ThumbnailEntry) -> Self {
        Self {
            url: entry.url.clone(),
            blob: entry.blob().map(|bytes| BASE64.encode(bytes)),
            content_type: entry.content_type().map(str::to_string),
            ttl: entry.ttl,
            error: entry.error(),
        }
    }
}

impl TryFrom<ThumbnailRecord> for ThumbnailEntry {
    type Error = StorageError;

    fn try_from(record: ThumbnailRecord) -> Result<Self, Self::Error> {
        let payload = match (record.error, record.blob) {
            (true, _) => ThumbnailPayload::Failed,
            (false, Some(encoded)) => ThumbnailPayload::Image {
                bytes: BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    StorageError::Validation(format!("thumbnail {}: bad base64: {}", record.url, e))
                })?,
                content_type: record
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            },
            (false, None) => {
                return Err(StorageError::Validation(format!(
                    "thumbnail {} has neither a blob nor the error flag",
                    record.url
                )));
            }
        };

        Ok(ThumbnailEntry {
            url: record.url,
            payload,
            ttl: record.ttl,
        })
    }
}

/// JSON form of a record
pub fn encode_item(item: &StoreItem) -> Result<serde_json::Value, StorageError> {
    Ok(match item {
        StoreItem::Media(record) => serde_json::to_value(record)?,
        StoreItem::Thumbnail(entry) => serde_json::to_value(ThumbnailRecord::from(entry))?,
    })
}

/// Parse interchange records belonging to `collection`
pub fn decode_items(
    collection: Collection,
    items: Vec<serde_json::Value>,
) -> Result<Vec<StoreItem>, StorageError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let invalid = |e: serde_json::Error| {
                StorageError::Validation(format!("item {}: {}", index, e))
            };
            match collection {
                Collection::Media => serde_json::from_value::<MediaRecord>(value)
                    .map(StoreItem::Media)
                    .map_err(invalid),
                Collection::Thumbnails => serde_json::from_value::<ThumbnailRecord>(value)
                    .map_err(invalid)
                    .and_then(ThumbnailEntry::try_from)
                    .map(StoreItem::Thumbnail),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thumbnail_blob_is_base64() {
        let entry = ThumbnailEntry::image("https://x/y.jpg", vec![0xff, 0xd8, 0xff], "image/jpeg", 9);
        let record = ThumbnailRecord::from(&entry);
        assert_eq!(record.blob.as_deref(), Some("/9j/"));

        let back = ThumbnailEntry::try_from(record).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn thumbnail_without_blob_or_error_is_rejected() {
        let items = vec![json!({"url": "https://x/y.jpg", "ttl": 1, "error": false})];
        let error = decode_items(Collection::Thumbnails, items).unwrap_err();
        assert!(matches!(error, StorageError::Validation(_)));
    }

    #[test]
    fn payload_accepts_envelope_or_array() {
        let envelope: ImportPayload = serde_json::from_value(json!({
            "type": EXPORT_TYPE,
            "store": "media",
            "items": []
        }))
        .unwrap();
        assert!(matches!(envelope, ImportPayload::Envelope(e) if e.store == Collection::Media));

        let array: ImportPayload = serde_json::from_value(json!([{"id": "v1"}])).unwrap();
        assert!(matches!(array, ImportPayload::Items(items) if items.len() == 1));
    }

    #[test]
    fn bad_media_item_reports_its_index() {
        let items = vec![
            json!({"id": "v1", "userId": "a", "platform": "TikTok", "originalUrl": "u", "scrapedAt": 1}),
            json!({"id": "v2"}),
        ];
        let error = decode_items(Collection::Media, items).unwrap_err();
        assert!(error.to_string().contains("item 1"));
    }
}
