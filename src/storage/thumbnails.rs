//! Thumbnail cache
//!
//! Cached fetch results keyed by source URL, with TTL freshness and negative
//! caching. [`ThumbnailCache::resolve`] implements the full refresh protocol
//! on top of the raw get/save/delete operations.

use std::sync::Arc;

use super::compress;
use super::fetcher::ThumbnailFetcher;
use crate::config::ThumbnailConfig;
use crate::data::{Database, ThumbnailEntry, ThumbnailPayload, ThumbnailRef};
use crate::error::StorageError;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, RECOMPRESSION_BYTES_SAVED, THUMBNAIL_FETCHES_TOTAL};

/// State of the cache for one URL at a point in time
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Success entry within its TTL
    Fresh(ThumbnailEntry),
    /// Failure entry within its TTL; do not refetch
    NegativeHit(ThumbnailEntry),
    /// `now >= ttl`; refetch eligible
    Expired(ThumbnailEntry),
    Miss,
}

/// Outcome of [`ThumbnailCache::resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Served from a fresh entry
    Hit(ThumbnailEntry),
    /// Served from a live negative entry
    NegativeHit(ThumbnailEntry),
    /// Refetched and stored
    Fetched(ThumbnailEntry),
    /// Refetch failed; the previous blob was kept with a renewed TTL
    Degraded(ThumbnailEntry),
    /// Refetch failed with nothing to fall back to; a negative entry was stored
    FetchFailed(ThumbnailEntry),
    /// Not an HTTP(S) URL; never fetched or cached
    Invalid,
}

impl Resolution {
    /// Whether resolving touched the network
    pub fn fetched(&self) -> bool {
        matches!(self, Self::Fetched(_) | Self::Degraded(_) | Self::FetchFailed(_))
    }

    pub fn entry(&self) -> Option<&ThumbnailEntry> {
        match self {
            Self::Hit(entry)
            | Self::NegativeHit(entry)
            | Self::Fetched(entry)
            | Self::Degraded(entry)
            | Self::FetchFailed(entry) => Some(entry),
            Self::Invalid => None,
        }
    }
}

/// Thumbnail cache over the `thumbnails` collection
#[derive(Clone)]
pub struct ThumbnailCache {
    db: Arc<Database>,
    config: ThumbnailConfig,
}

impl ThumbnailCache {
    pub fn new(db: Arc<Database>, config: ThumbnailConfig) -> Self {
        Self { db, config }
    }

    fn success_ttl_millis(&self) -> i64 {
        self.config.success_ttl().as_millis() as i64
    }

    fn error_ttl_millis(&self) -> i64 {
        self.config.error_ttl().as_millis() as i64
    }

    pub async fn get(&self, url: &str) -> Result<Option<ThumbnailEntry>, StorageError> {
        self.db.get_thumbnail(url).await
    }

    /// Persist an entry, recompressing image payloads when that shrinks them.
    ///
    /// Recompression failures are logged and the original blob is stored.
    ///
    /// # Returns
    /// The entry as stored
    pub async fn save(&self, entry: ThumbnailEntry) -> Result<ThumbnailEntry, StorageError> {
        let entry = if self.config.recompress {
            self.try_recompress(entry).await
        } else {
            entry
        };

        self.db.put_thumbnail(&entry).await?;
        Ok(entry)
    }

    async fn try_recompress(&self, entry: ThumbnailEntry) -> ThumbnailEntry {
        let ThumbnailPayload::Image {
            bytes,
            content_type,
        } = &entry.payload
        else {
            return entry;
        };

        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return entry;
        }

        let input = bytes.clone();
        let input_type = content_type.clone();
        let result =
            tokio::task::spawn_blocking(move || compress::recompress(&input, &input_type)).await;

        match result {
            Ok(Ok(Some(smaller))) => {
                let saved = bytes.len() - smaller.bytes.len();
                RECOMPRESSION_BYTES_SAVED.inc_by(saved as u64);
                tracing::debug!(url = %entry.url, saved, "Thumbnail recompressed");
                ThumbnailEntry {
                    url: entry.url,
                    payload: ThumbnailPayload::Image {
                        bytes: smaller.bytes,
                        content_type: smaller.content_type.to_string(),
                    },
                    ttl: entry.ttl,
                }
            }
            Ok(Ok(None)) => entry,
            Ok(Err(e)) => {
                tracing::warn!(url = %entry.url, error = %e, "Recompression failed, keeping original");
                entry
            }
            Err(e) => {
                tracing::warn!(url = %entry.url, error = %e, "Recompression task failed, keeping original");
                entry
            }
        }
    }

    pub async fn delete(&self, url: &str) -> Result<bool, StorageError> {
        self.db.delete(crate::data::Collection::Thumbnails, url).await
    }

    /// Classify the cached state of `url` at `now` (epoch millis)
    pub async fn lookup(&self, url: &str, now: i64) -> Result<CacheLookup, StorageError> {
        let lookup = match self.db.get_thumbnail(url).await? {
            None => CacheLookup::Miss,
            Some(entry) if entry.is_expired(now) => CacheLookup::Expired(entry),
            Some(entry) if entry.error() => CacheLookup::NegativeHit(entry),
            Some(entry) => CacheLookup::Fresh(entry),
        };

        match &lookup {
            CacheLookup::Fresh(_) => CACHE_HITS_TOTAL.with_label_values(&["fresh"]).inc(),
            CacheLookup::NegativeHit(_) => CACHE_HITS_TOTAL.with_label_values(&["negative"]).inc(),
            CacheLookup::Expired(_) => CACHE_MISSES_TOTAL.with_label_values(&["expired"]).inc(),
            CacheLookup::Miss => CACHE_MISSES_TOTAL.with_label_values(&["miss"]).inc(),
        }

        Ok(lookup)
    }

    /// Serve `url` from cache, refetching through `fetcher` on miss or expiry.
    ///
    /// - fresh success or live negative entry: no fetch
    /// - refetch success: new success entry with the success TTL
    /// - refetch failure with a previous blob: keep the blob, renew its TTL
    /// - refetch failure without one: negative entry with the error TTL
    pub async fn resolve<F: ThumbnailFetcher>(
        &self,
        url: &str,
        fetcher: &F,
        now: i64,
    ) -> Result<Resolution, StorageError> {
        let Some(url) = ThumbnailRef::classify(Some(url)).valid_url() else {
            return Ok(Resolution::Invalid);
        };

        let previous = match self.lookup(url, now).await? {
            CacheLookup::Fresh(entry) => return Ok(Resolution::Hit(entry)),
            CacheLookup::NegativeHit(entry) => return Ok(Resolution::NegativeHit(entry)),
            CacheLookup::Expired(entry) => Some(entry),
            CacheLookup::Miss => None,
        };

        match fetcher.fetch(url).await {
            Ok(fetched) => {
                THUMBNAIL_FETCHES_TOTAL.with_label_values(&["success"]).inc();
                let entry = ThumbnailEntry::image(
                    url,
                    fetched.bytes,
                    fetched.content_type,
                    now + self.success_ttl_millis(),
                );
                let stored = self.save(entry).await?;
                Ok(Resolution::Fetched(stored))
            }
            Err(e) => {
                THUMBNAIL_FETCHES_TOTAL.with_label_values(&["failure"]).inc();
                tracing::warn!(url, error = %e, "Thumbnail fetch failed");

                match previous.filter(|entry| !entry.error()) {
                    Some(mut stale) => {
                        stale.ttl = now + self.success_ttl_millis();
                        self.db.put_thumbnail(&stale).await?;
                        Ok(Resolution::Degraded(stale))
                    }
                    None => {
                        let entry = ThumbnailEntry::failed(url, now + self.error_ttl_millis());
                        self.db.put_thumbnail(&entry).await?;
                        Ok(Resolution::FetchFailed(entry))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FakeFetcher;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;

    const HOUR: i64 = 3600 * 1000;
    const URL: &str = "https://cdn.example.com/thumb.jpg";

    async fn create_cache() -> (ThumbnailCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::connect(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (
            ThumbnailCache::new(Arc::new(db), ThumbnailConfig::default()),
            temp_dir,
        )
    }

    fn gradient_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(48, 48, |x, y| Rgb([(x * 5) as u8, (y * 5) as u8, 128]));
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn negative_entry_expires_after_error_ttl() {
        let (cache, _temp_dir) = create_cache().await;
        let now = 1_700_000_000_000;
        cache
            .save(ThumbnailEntry::failed(URL, now + 24 * HOUR))
            .await
            .unwrap();

        assert!(matches!(
            cache.lookup(URL, now + HOUR).await.unwrap(),
            CacheLookup::NegativeHit(_)
        ));
        assert!(matches!(
            cache.lookup(URL, now + 25 * HOUR).await.unwrap(),
            CacheLookup::Expired(_)
        ));

        let fetcher = FakeFetcher::failing();
        let resolution = cache.resolve(URL, &fetcher, now + HOUR).await.unwrap();
        assert!(matches!(resolution, Resolution::NegativeHit(_)));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn saved_image_is_never_larger() {
        let (cache, _temp_dir) = create_cache().await;
        let jpeg = gradient_jpeg();

        cache
            .save(ThumbnailEntry::image(URL, jpeg.clone(), "image/jpeg", i64::MAX))
            .await
            .unwrap();

        let stored = cache.get(URL).await.unwrap().unwrap();
        assert!(!stored.error());
        assert!(stored.blob().unwrap().len() <= jpeg.len());
    }

    #[tokio::test]
    async fn undecodable_payload_is_stored_verbatim() {
        let (cache, _temp_dir) = create_cache().await;
        let entry = ThumbnailEntry::image(URL, b"not an image".to_vec(), "image/png", 10);

        let stored = cache.save(entry.clone()).await.unwrap();
        assert_eq!(stored, entry);
        assert_eq!(cache.get(URL).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn miss_then_fetch_stores_success_entry() {
        let (cache, _temp_dir) = create_cache().await;
        let fetcher = FakeFetcher::serving(b"bytes".to_vec(), "application/x-test");
        let now = 1_000;

        let resolution = cache.resolve(URL, &fetcher, now).await.unwrap();
        let Resolution::Fetched(entry) = resolution else {
            panic!("expected a fetch, got {:?}", resolution);
        };
        assert_eq!(entry.ttl, now + 7 * 24 * HOUR);
        assert_eq!(fetcher.calls(), 1);

        let again = cache.resolve(URL, &fetcher, now + HOUR).await.unwrap();
        assert!(matches!(again, Resolution::Hit(_)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_previous_blob() {
        let (cache, _temp_dir) = create_cache().await;
        let original = ThumbnailEntry::image(URL, b"old".to_vec(), "application/x-test", 100);
        cache.save(original).await.unwrap();

        let now = 200;
        let fetcher = FakeFetcher::failing();
        let resolution = cache.resolve(URL, &fetcher, now).await.unwrap();

        let Resolution::Degraded(entry) = resolution else {
            panic!("expected degraded, got {:?}", resolution);
        };
        assert_eq!(entry.blob(), Some(&b"old"[..]));
        assert_eq!(entry.ttl, now + 7 * 24 * HOUR);
        assert_eq!(cache.get(URL).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn failed_fetch_without_blob_creates_negative_entry() {
        let (cache, _temp_dir) = create_cache().await;
        let fetcher = FakeFetcher::failing();
        let now = 5_000;

        let resolution = cache.resolve(URL, &fetcher, now).await.unwrap();
        let Resolution::FetchFailed(entry) = resolution else {
            panic!("expected negative entry, got {:?}", resolution);
        };
        assert!(entry.error());
        assert_eq!(entry.ttl, now + 24 * HOUR);
    }

    #[tokio::test]
    async fn data_uri_is_never_fetched() {
        let (cache, _temp_dir) = create_cache().await;
        let fetcher = FakeFetcher::failing();

        let resolution = cache
            .resolve("data:image/png;base64,AAAA", &fetcher, 0)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Invalid);
        assert_eq!(fetcher.calls(), 0);
    }
}
