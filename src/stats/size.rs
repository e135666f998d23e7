//! Cheap byte-size estimates
//!
//! A typed walk instead of serialization: serializing blobs is exactly the
//! cost being avoided. Strings count two bytes per UTF-16 unit, numbers 8,
//! booleans 4, blobs their length. Nested values stop counting past
//! `max_depth`.

use serde_json::Value;

use crate::data::MediaRecord;

const NUMBER_BYTES: u64 = 8;
const BOOL_BYTES: u64 = 4;

fn string_bytes(s: &str) -> u64 {
    s.encode_utf16().count() as u64 * 2
}

pub fn estimate_value(value: &Value, depth: usize, max_depth: usize) -> u64 {
    if depth > max_depth {
        return 0;
    }

    match value {
        Value::Null => 0,
        Value::Bool(_) => BOOL_BYTES,
        Value::Number(_) => NUMBER_BYTES,
        Value::String(s) => string_bytes(s),
        Value::Array(items) => items
            .iter()
            .map(|item| estimate_value(item, depth + 1, max_depth))
            .sum(),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| string_bytes(key) + estimate_value(item, depth + 1, max_depth))
            .sum(),
    }
}

pub fn estimate_media(record: &MediaRecord, max_depth: usize) -> u64 {
    let mut bytes = string_bytes(&record.id)
        + string_bytes(&record.user_id)
        + string_bytes(&record.platform)
        + string_bytes(&record.original_url)
        + record.thumbnail_url.as_deref().map_or(0, string_bytes)
        // scraped_at, export_flags
        + 2 * NUMBER_BYTES;

    if record.legacy_exported.is_some() {
        bytes += BOOL_BYTES;
    }

    bytes
        + record
            .extra
            .iter()
            .map(|(key, value)| string_bytes(key) + estimate_value(value, 1, max_depth))
            .sum::<u64>()
}

/// Thumbnail entry size from column lengths, without loading the blob
pub fn estimate_thumbnail(url: &str, blob_len: u64, content_type: Option<&str>) -> u64 {
    string_bytes(url)
        + blob_len
        + content_type.map_or(0, string_bytes)
        // ttl, error
        + NUMBER_BYTES
        + BOOL_BYTES
}
