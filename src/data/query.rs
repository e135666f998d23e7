//! Filtered and paginated reads over `media`
//!
//! Every query streams rows through a [`Cursor`] bounded by the most
//! selective secondary index for the criteria, applies the remaining
//! predicates in memory, and stops pulling rows as soon as the page is full.
//!
//! Rows come back in natural key order. Sorting a page (for example by
//! `scrapedAt` descending) is the caller's job and is only stable per page:
//! a globally sorted listing would need a full-table sort.

use futures::StreamExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

use super::cursor::Cursor;
use super::database::Database;
use super::models::*;
use crate::error::StorageError;

const SELECT_MEDIA_BY_PLATFORM: &str = "SELECT id, user_id, platform, original_url, thumbnail_url, scraped_at, export_flags, exported, extra FROM media WHERE platform = ? ORDER BY id";
const SELECT_MEDIA_BY_USER: &str = "SELECT id, user_id, platform, original_url, thumbnail_url, scraped_at, export_flags, exported, extra FROM media WHERE user_id = ? ORDER BY id";
const SELECT_MEDIA_ALL: &str = "SELECT id, user_id, platform, original_url, thumbnail_url, scraped_at, export_flags, exported, extra FROM media ORDER BY id";

/// Filter over media records
///
/// `platform` and `userId` accept the `"ALL"` sentinel (or an empty string)
/// as "no filter" when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaCriteria {
    #[serde(deserialize_with = "deserialize_filter")]
    pub platform: Option<String>,
    #[serde(deserialize_with = "deserialize_filter")]
    pub user_id: Option<String>,
    /// Inclusive lower bound on `scrapedAt`
    pub start_date: Option<i64>,
    /// Inclusive upper bound on `scrapedAt`
    pub end_date: Option<i64>,
    pub new_only: bool,
    /// With `new_only`, reject records having any of these bits
    pub exclude_mask: ExportFlags,
}

fn deserialize_filter<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty() && v != "ALL"))
}

/// Key range a scan is bounded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanRange<'c> {
    Platform(&'c str),
    User(&'c str),
    Full,
}

impl MediaCriteria {
    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Records not yet consumed by any channel in `mask`
    pub fn new_only(mut self, mask: ExportFlags) -> Self {
        self.new_only = true;
        self.exclude_mask = mask;
        self
    }

    pub fn between(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// No predicate narrows the result
    pub fn is_unfiltered(&self) -> bool {
        self.platform.is_none()
            && self.user_id.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && !(self.new_only && !self.exclude_mask.is_empty())
    }

    pub(crate) fn scan_range(&self) -> ScanRange<'_> {
        if let Some(platform) = self.platform.as_deref() {
            ScanRange::Platform(platform)
        } else if let Some(user_id) = self.user_id.as_deref() {
            ScanRange::User(user_id)
        } else {
            ScanRange::Full
        }
    }

    pub fn matches(&self, record: &MediaRecord) -> bool {
        if self.platform.as_deref().is_some_and(|p| p != record.platform) {
            return false;
        }
        if self.user_id.as_deref().is_some_and(|u| u != record.user_id) {
            return false;
        }
        if self.start_date.is_some_and(|start| record.scraped_at < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| record.scraped_at > end) {
            return false;
        }
        if self.new_only && record.effective_flags().intersects(self.exclude_mask) {
            return false;
        }
        true
    }
}

impl Database {
    /// Cursor over `media` in key order, bounded by the criteria's best index.
    ///
    /// The cursor yields every record in the scanned range; callers apply
    /// [`MediaCriteria::matches`] themselves.
    pub async fn media_cursor(
        &self,
        criteria: &MediaCriteria,
    ) -> Result<Cursor<'_, MediaRecord>, StorageError> {
        let pool = self.pool().await?;

        let query = match criteria.scan_range() {
            ScanRange::Platform(platform) => {
                sqlx::query_as::<_, MediaRow>(SELECT_MEDIA_BY_PLATFORM).bind(platform.to_string())
            }
            ScanRange::User(user_id) => {
                sqlx::query_as::<_, MediaRow>(SELECT_MEDIA_BY_USER).bind(user_id.to_string())
            }
            ScanRange::Full => sqlx::query_as::<_, MediaRow>(SELECT_MEDIA_ALL),
        };

        let rows = query
            .fetch(pool)
            .map(|row| row.map_err(StorageError::from).and_then(MediaRow::into_record))
            .boxed();

        Ok(Cursor::new(rows))
    }

    /// One page of matching media.
    ///
    /// Skips the first `offset` *matching* records, collects up to `limit`,
    /// and stops scanning the moment the `limit + 1`-th match is seen.
    pub async fn query_media(
        &self,
        criteria: &MediaCriteria,
        offset: MatchOffset,
        limit: usize,
    ) -> Result<Page<MediaRecord>, StorageError> {
        let started = Instant::now();
        let mut cursor = self.media_cursor(criteria).await?;

        let mut to_skip = offset.0;
        let mut items = Vec::with_capacity(limit.min(1024));
        let mut has_more = false;

        while let Some(record) = cursor.next().await? {
            if !criteria.matches(&record) {
                continue;
            }
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            if items.len() == limit {
                has_more = true;
                break;
            }
            items.push(record);
        }

        tracing::debug!(
            offset = offset.0,
            limit,
            returned = items.len(),
            has_more,
            scanned = cursor.position(),
            "Media page served"
        );
        crate::metrics::observe_store_operation("query", Collection::Media.as_str(), started.elapsed());

        Ok(Page { items, has_more })
    }

    /// Number of matching media records
    pub async fn count_media(&self, criteria: &MediaCriteria) -> Result<u64, StorageError> {
        if criteria.is_unfiltered() {
            return self.count(Collection::Media).await;
        }

        let mut cursor = self.media_cursor(criteria).await?;
        let mut count = 0;
        while let Some(record) = cursor.next().await? {
            if criteria.matches(&record) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Distinct user ids among matching media, ascending.
    ///
    /// A `user_id` filter in `criteria` is ignored: the result feeds the
    /// user picker, which must list every user for the other filters.
    pub async fn get_unique_users(&self, criteria: &MediaCriteria) -> Result<Vec<String>, StorageError> {
        let criteria = MediaCriteria {
            user_id: None,
            ..criteria.clone()
        };

        let mut cursor = self.media_cursor(&criteria).await?;
        let mut users = BTreeSet::new();
        while let Some(record) = cursor.next().await? {
            if criteria.matches(&record) {
                users.insert(record.user_id);
            }
        }
        Ok(users.into_iter().collect())
    }

    /// Raw, unfiltered page of a collection in natural key order.
    ///
    /// `offset` must equal the number of items already retrieved by previous
    /// calls; the cursor is advanced by it once and then read sequentially.
    pub async fn export_store(
        &self,
        collection: Collection,
        offset: RawOffset,
        limit: usize,
    ) -> Result<Page<StoreItem>, StorageError> {
        let started = Instant::now();
        let mut cursor = self.store_cursor(collection).await?;

        if offset.0 > 0 && cursor.advance(offset.0).await? < offset.0 {
            return Ok(Page::empty());
        }

        let mut items = Vec::with_capacity(limit.min(1024));
        let mut has_more = false;
        while let Some(item) = cursor.next().await? {
            if items.len() == limit {
                has_more = true;
                break;
            }
            items.push(item);
        }

        crate::metrics::observe_store_operation("export", collection.as_str(), started.elapsed());
        Ok(Page { items, has_more })
    }

    /// Ids of every matching media record, in key order
    pub async fn matching_ids(&self, criteria: &MediaCriteria) -> Result<Vec<String>, StorageError> {
        let mut cursor = self.media_cursor(criteria).await?;
        let mut ids = Vec::new();
        while let Some(record) = cursor.next().await? {
            if criteria.matches(&record) {
                ids.push(record.id);
            }
        }
        Ok(ids)
    }

    /// Delete every matching media record in atomic batches
    ///
    /// # Returns
    /// Number of records removed
    pub async fn delete_matching(
        &self,
        criteria: &MediaCriteria,
        batch_size: usize,
    ) -> Result<u64, StorageError> {
        let ids = self.matching_ids(criteria).await?;
        let mut removed = 0;
        for batch in ids.chunks(batch_size.max(1)) {
            removed += self.delete_batch(Collection::Media, batch).await?;
            tokio::task::yield_now().await;
        }

        tracing::info!(matched = ids.len(), removed, "Deleted matching media");
        Ok(removed)
    }
}
