//! Bulk export and import
//!
//! Full dumps are assembled from raw `export_store` pages so a large
//! collection is never materialized by a single query. Imports are applied
//! in one transaction per call.

mod envelope;

pub use envelope::{
    EXPORT_TYPE, ExportEnvelope, ImportMode, ImportPayload, ThumbnailRecord, decode_items,
    encode_item,
};

use serde::{Deserialize, Serialize};

use crate::data::{Collection, Database, MediaRecord, RawOffset, StoreItem, ThumbnailEntry, now_millis};
use crate::error::StorageError;

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    /// Records left alone because the key already existed (skip mode)
    pub skipped: usize,
    /// Records kept because the import would have replaced an HTTP thumbnail
    /// with a data URI
    pub preserved: usize,
}

/// Dump a whole collection, paging through it `page_size` records at a time
pub async fn export_all(
    db: &Database,
    collection: Collection,
    page_size: usize,
) -> Result<ExportEnvelope, StorageError> {
    let page_size = page_size.max(1);
    let mut offset = RawOffset::default();
    let mut items = Vec::new();

    loop {
        let page = db.export_store(collection, offset, page_size).await?;
        offset = offset.after(page.items.len());
        for item in &page.items {
            items.push(encode_item(item)?);
        }
        if !page.has_more {
            break;
        }
        tokio::task::yield_now().await;
    }

    tracing::info!(collection = %collection, count = items.len(), "Exported collection");

    Ok(ExportEnvelope {
        kind: EXPORT_TYPE.to_string(),
        store: collection,
        exported_at: Some(now_millis()),
        items,
    })
}

/// Load records into `collection`
///
/// # Errors
/// Returns `Validation` if the payload is a dump of another collection, has
/// an unknown `type`, or contains a malformed record. Nothing is written in
/// that case.
pub async fn import(
    db: &Database,
    collection: Collection,
    payload: ImportPayload,
    mode: ImportMode,
) -> Result<ImportReport, StorageError> {
    let raw = match payload {
        ImportPayload::Envelope(envelope) => {
            if envelope.kind != EXPORT_TYPE {
                return Err(StorageError::Validation(format!(
                    "unsupported export type: {}",
                    envelope.kind
                )));
            }
            if envelope.store != collection {
                return Err(StorageError::Validation(format!(
                    "export of {} cannot be imported into {}",
                    envelope.store, collection
                )));
            }
            envelope.items
        }
        ImportPayload::Items(items) => items,
    };

    let items = decode_items(collection, raw)?;
    let total = items.len();

    let report = match collection {
        Collection::Media => {
            let records: Vec<MediaRecord> = items
                .into_iter()
                .filter_map(|item| match item {
                    StoreItem::Media(record) => Some(record),
                    StoreItem::Thumbnail(_) => None,
                })
                .collect();
            match mode {
                ImportMode::Skip => {
                    let imported = db.insert_media_if_absent(&records).await?;
                    ImportReport {
                        imported,
                        skipped: total - imported,
                        preserved: 0,
                    }
                }
                ImportMode::Overwrite | ImportMode::Merge => {
                    let saved = db.put_all_media(&records).await?;
                    ImportReport {
                        imported: saved.written,
                        skipped: 0,
                        preserved: saved.preserved,
                    }
                }
            }
        }
        Collection::Thumbnails => {
            let entries: Vec<ThumbnailEntry> = items
                .into_iter()
                .filter_map(|item| match item {
                    StoreItem::Thumbnail(entry) => Some(entry),
                    StoreItem::Media(_) => None,
                })
                .collect();
            let only_absent = mode == ImportMode::Skip;
            let imported = db.put_all_thumbnails(&entries, only_absent).await?;
            ImportReport {
                imported,
                skipped: total - imported,
                preserved: 0,
            }
        }
    };

    tracing::info!(
        collection = %collection,
        mode = ?mode,
        imported = report.imported,
        skipped = report.skipped,
        preserved = report.preserved,
        "Imported records"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ExportFlags;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::connect(&temp_dir.path().join("test.db")).await.unwrap();
        (db, temp_dir)
    }

    fn media(id: &str, user: &str, thumbnail: Option<&str>) -> MediaRecord {
        MediaRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            platform: "TikTok".to_string(),
            original_url: format!("https://www.tiktok.com/@{}/video/{}", user, id),
            thumbnail_url: thumbnail.map(str::to_string),
            scraped_at: 1_700_000_000_000,
            export_flags: ExportFlags::NONE,
            legacy_exported: None,
            extra: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_export_then_import_into_empty_store() {
        let (source, _source_dir) = create_test_db().await;
        let records: Vec<MediaRecord> = (0..7)
            .map(|i| media(&format!("v{}", i), "alice", Some("https://cdn/x.jpg")))
            .collect();
        source.put_all_media(&records).await.unwrap();
        source
            .put_thumbnail(&ThumbnailEntry::image("https://cdn/x.jpg", vec![1, 2, 3], "image/jpeg", 5))
            .await
            .unwrap();

        let media_dump = export_all(&source, Collection::Media, 3).await.unwrap();
        assert_eq!(media_dump.kind, EXPORT_TYPE);
        assert_eq!(media_dump.items.len(), 7);
        let thumb_dump = export_all(&source, Collection::Thumbnails, 3).await.unwrap();

        let (target, _target_dir) = create_test_db().await;
        let report = import(
            &target,
            Collection::Media,
            ImportPayload::Envelope(media_dump),
            ImportMode::Overwrite,
        )
        .await
        .unwrap();
        assert_eq!(report.imported, 7);
        import(
            &target,
            Collection::Thumbnails,
            ImportPayload::Envelope(thumb_dump),
            ImportMode::Overwrite,
        )
        .await
        .unwrap();

        assert_eq!(target.get_all_media().await.unwrap(), source.get_all_media().await.unwrap());
        let thumb = target.get_thumbnail("https://cdn/x.jpg").await.unwrap().unwrap();
        assert_eq!(thumb.blob(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test]
    async fn test_skip_mode_keeps_existing() {
        let (db, _temp_dir) = create_test_db().await;
        db.put_media(&media("v1", "alice", None)).await.unwrap();

        let payload = ImportPayload::Items(vec![
            serde_json::to_value(media("v1", "mallory", None)).unwrap(),
            serde_json::to_value(media("v2", "bob", None)).unwrap(),
        ]);
        let report = import(&db, Collection::Media, payload, ImportMode::Skip)
            .await
            .unwrap();

        assert_eq!(
            report,
            ImportReport {
                imported: 1,
                skipped: 1,
                preserved: 0
            }
        );
        assert_eq!(db.get_media("v1").await.unwrap().unwrap().user_id, "alice");
        assert!(db.get_media("v2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_does_not_downgrade_http_thumbnail() {
        let (db, _temp_dir) = create_test_db().await;
        db.put_media(&media("v1", "alice", Some("https://cdn/v1.jpg")))
            .await
            .unwrap();

        let incoming = media("v1", "alice", Some("data:image/png;base64,AAAA"));
        let payload = ImportPayload::Items(vec![serde_json::to_value(incoming).unwrap()]);
        let report = import(&db, Collection::Media, payload, ImportMode::Merge)
            .await
            .unwrap();

        assert_eq!(report.preserved, 1);
        let stored = db.get_media("v1").await.unwrap().unwrap();
        assert_eq!(stored.thumbnail_url.as_deref(), Some("https://cdn/v1.jpg"));
    }

    #[tokio::test]
    async fn test_wrong_store_is_rejected() {
        let (db, _temp_dir) = create_test_db().await;
        let payload: ImportPayload = serde_json::from_value(json!({
            "type": EXPORT_TYPE,
            "store": "thumbnails",
            "items": []
        }))
        .unwrap();

        let result = import(&db, Collection::Media, payload, ImportMode::Overwrite).await;
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_legacy_export_flag_is_migrated_on_import() {
        let (db, _temp_dir) = create_test_db().await;
        let mut legacy = serde_json::to_value(media("v1", "alice", None)).unwrap();
        legacy["exported"] = json!(true);
        legacy.as_object_mut().unwrap().remove("exportFlags");

        import(&db, Collection::Media, ImportPayload::Items(vec![legacy]), ImportMode::Overwrite)
            .await
            .unwrap();

        let stored = db.get_media("v1").await.unwrap().unwrap();
        assert_eq!(stored.legacy_exported, None);
        assert!(stored.export_flags.contains(ExportFlags::ALL_EXPORT));
    }
}
