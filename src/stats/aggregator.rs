//! Two-tier statistics aggregation
//!
//! The fast path counts records and classifies the thumbnail cache in two
//! streamed passes and returns immediately. Byte sizes come from a separate
//! chunked background scan whose result is persisted with its own TTL and
//! merged into the fast snapshot when fresh.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, watch};

use super::size::{estimate_media, estimate_thumbnail};
use super::snapshot::{DetailedStats, StatsProgress, StorageUsage, UserTotals};
use crate::config::StatsConfig;
use crate::data::{Collection, Database, ThumbnailRef, now_millis};
use crate::error::StorageError;
use crate::metrics::{RECORDS_TOTAL, STATS_COMPUTATIONS_TOTAL, STATS_DURATION_SECONDS};

const DETAILED_KEY: &str = "stats.detailed";
const PROGRESS_STEP: u8 = 5;

/// Clears the queued-recompute flag when the background task ends, even by
/// panic
struct RequestGuard(Arc<StatsAggregator>);

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.detailed_requested.store(false, Ordering::Release);
    }
}

/// Statistics aggregator
pub struct StatsAggregator {
    db: Arc<Database>,
    config: StatsConfig,
    /// Last fast snapshot, without detailed fields merged
    fast: RwLock<Option<StorageUsage>>,
    /// Serializes detailed computations
    detailed_lock: Mutex<()>,
    detailed_requested: AtomicBool,
    progress: watch::Sender<StatsProgress>,
}

impl StatsAggregator {
    pub fn new(db: Arc<Database>, config: StatsConfig) -> Self {
        let (progress, _) = watch::channel(StatsProgress::Idle);
        Self {
            db,
            config,
            fast: RwLock::new(None),
            detailed_lock: Mutex::new(()),
            detailed_requested: AtomicBool::new(false),
            progress,
        }
    }

    /// Subscribe to detailed computation progress
    pub fn subscribe(&self) -> watch::Receiver<StatsProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> StatsProgress {
        self.progress.borrow().clone()
    }

    fn fast_ttl_millis(&self) -> i64 {
        (self.config.fast_ttl_seconds * 1000) as i64
    }

    fn detailed_ttl_millis(&self) -> i64 {
        (self.config.detailed_ttl_seconds * 1000) as i64
    }

    // =========================================================================
    // Fast path
    // =========================================================================

    /// Current storage usage.
    ///
    /// The cached fast snapshot is reused while no record write happened and
    /// it is within its TTL. Byte fields are filled from a fresh detailed
    /// snapshot; without one a background recompute is requested and
    /// `detailed_pending` is set.
    pub async fn get_storage_usage(
        self: &Arc<Self>,
        force_refresh: bool,
    ) -> Result<StorageUsage, StorageError> {
        let now = now_millis();

        let cached = if force_refresh || self.db.is_dirty() {
            None
        } else {
            self.fast
                .read()
                .await
                .clone()
                .filter(|usage| now - usage.computed_at < self.fast_ttl_millis())
        };

        let mut usage = match cached {
            Some(usage) => usage,
            None => {
                // Writes landing during the scan dirty the flag again
                self.db.take_dirty();
                let usage = self.compute_fast().await?;
                *self.fast.write().await = Some(usage.clone());
                usage
            }
        };

        self.merge_detailed(&mut usage, now).await?;
        Ok(usage)
    }

    async fn compute_fast(&self) -> Result<StorageUsage, StorageError> {
        let started = Instant::now();
        let result = self.scan_fast().await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        STATS_COMPUTATIONS_TOTAL
            .with_label_values(&["fast", outcome])
            .inc();
        STATS_DURATION_SECONDS
            .with_label_values(&["fast"])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn scan_fast(&self) -> Result<StorageUsage, StorageError> {
        let total_videos = self.db.count(Collection::Media).await?;
        let total_thumbnails = self.db.count(Collection::Thumbnails).await?;

        let mut per_user = UserTotals::default();
        let mut references: HashMap<String, u64> = HashMap::new();
        let mut last_scraped: Option<i64> = None;
        let mut invalid_thumbnails = 0;

        let mut media = self.db.media_summaries().await?;
        while let Some(row) = media.next().await? {
            per_user.add(&row.user_id, 1);
            last_scraped = Some(last_scraped.map_or(row.scraped_at, |last| last.max(row.scraped_at)));

            match ThumbnailRef::classify(row.thumbnail_url.as_deref()).valid_url() {
                Some(url) => *references.entry(url.to_string()).or_insert(0) += 1,
                None => invalid_thumbnails += 1,
            }
        }
        drop(media);

        let duplicate_thumbnails = references.values().map(|count| count - 1).sum();

        let now = now_millis();
        let (mut cached, mut expired, mut failed, mut orphaned, mut present) = (0, 0, 0, 0, 0);
        let mut thumbnails = self.db.thumbnail_states().await?;
        while let Some(row) = thumbnails.next().await? {
            if !references.contains_key(&row.url) {
                orphaned += 1;
                continue;
            }
            present += 1;
            if row.error {
                failed += 1;
            } else if now >= row.ttl {
                expired += 1;
            } else {
                cached += 1;
            }
        }
        drop(thumbnails);

        let database_bytes_estimate = match self.db.database_size_estimate().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Database size estimate unavailable");
                None
            }
        };

        RECORDS_TOTAL
            .with_label_values(&[Collection::Media.as_str()])
            .set(total_videos as i64);
        RECORDS_TOTAL
            .with_label_values(&[Collection::Thumbnails.as_str()])
            .set(total_thumbnails as i64);

        Ok(StorageUsage {
            total_videos,
            total_users: per_user.len() as u64,
            total_thumbnails,
            cached_thumbnails: cached,
            expired_thumbnails: expired,
            failed_thumbnails: failed,
            orphaned_thumbnails: orphaned,
            invalid_thumbnails,
            missing_thumbnails: references.len() as u64 - present,
            duplicate_thumbnails,
            last_scraped,
            top_user_by_count: per_user.top(),
            top_user_by_size: None,
            total_bytes: None,
            thumbnail_bytes: None,
            content_duplicates: None,
            database_bytes_estimate,
            computed_at: now,
            detailed_pending: false,
        })
    }

    async fn merge_detailed(self: &Arc<Self>, usage: &mut StorageUsage, now: i64) -> Result<(), StorageError> {
        match self.load_detailed().await? {
            Some(detailed) if now - detailed.computed_at < self.detailed_ttl_millis() => {
                usage.total_bytes = Some(detailed.total_bytes);
                usage.thumbnail_bytes = Some(detailed.thumbnail_bytes);
                usage.top_user_by_size = detailed.top_user_by_size;
                usage.content_duplicates = detailed.content_duplicates;
                usage.detailed_pending = false;
            }
            _ => {
                usage.detailed_pending = true;
                self.request_detailed();
            }
        }
        Ok(())
    }

    /// Fire-and-forget detailed recompute; no-op while one is queued
    pub fn request_detailed(self: &Arc<Self>) {
        if self.detailed_requested.swap(true, Ordering::AcqRel) {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _requested = RequestGuard(Arc::clone(&this));
            if let Err(e) = this.calculate_detailed_stats().await {
                tracing::warn!(error = %e, "Background detailed statistics failed");
            }
        });
    }

    // =========================================================================
    // Detailed path
    // =========================================================================

    /// Persisted detailed snapshot, regardless of age
    pub async fn load_detailed(&self) -> Result<Option<DetailedStats>, StorageError> {
        match self.db.get_state(DETAILED_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(detailed) => Ok(Some(detailed)),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable detailed statistics");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Run the chunked detailed scan and persist its result.
    ///
    /// Callers arriving while a scan is running wait for it and share its
    /// result instead of starting another.
    pub async fn calculate_detailed_stats(&self) -> Result<DetailedStats, StorageError> {
        let requested_at = now_millis();
        let _guard = self.detailed_lock.lock().await;

        if let Some(detailed) = self.load_detailed().await? {
            if detailed.computed_at >= requested_at {
                return Ok(detailed);
            }
        }

        let started = Instant::now();
        self.progress.send_replace(StatsProgress::Calculating { percent: 0 });

        let result = self.scan_detailed().await;
        STATS_DURATION_SECONDS
            .with_label_values(&["detailed"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(detailed) => {
                self.db
                    .set_state(DETAILED_KEY, &serde_json::to_string(&detailed)?)
                    .await?;
                STATS_COMPUTATIONS_TOTAL
                    .with_label_values(&["detailed", "ok"])
                    .inc();
                self.progress.send_replace(StatsProgress::Complete);
                tracing::info!(
                    total_bytes = detailed.total_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Detailed statistics computed"
                );
                Ok(detailed)
            }
            Err(e) => {
                STATS_COMPUTATIONS_TOTAL
                    .with_label_values(&["detailed", "error"])
                    .inc();
                self.progress.send_replace(StatsProgress::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn report_progress(&self, processed: u64, total: u64, last_percent: &mut u8) {
        if total == 0 {
            return;
        }
        let percent = ((processed.min(total) * 100 / total) as u8) / PROGRESS_STEP * PROGRESS_STEP;
        if percent > *last_percent {
            *last_percent = percent;
            self.progress
                .send_replace(StatsProgress::Calculating { percent });
        }
    }

    async fn pause(&self) {
        if self.config.chunk_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.chunk_pause_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    async fn scan_detailed(&self) -> Result<DetailedStats, StorageError> {
        let chunk_size = self.config.chunk_size.max(1);
        let max_depth = self.config.max_depth;

        let total = self.db.count(Collection::Media).await? + self.db.count(Collection::Thumbnails).await?;
        let mut processed = 0u64;
        let mut last_percent = 0u8;

        let mut user_bytes = UserTotals::default();
        let mut first_user_for_url: HashMap<String, String> = HashMap::new();
        let mut media_bytes = 0u64;

        let mut after: Option<String> = None;
        loop {
            let chunk = self.db.media_chunk(after.as_deref(), chunk_size).await?;
            for record in &chunk {
                let size = estimate_media(record, max_depth);
                media_bytes += size;
                user_bytes.add(&record.user_id, size);
                if let Some(url) = record.thumbnail().valid_url() {
                    first_user_for_url
                        .entry(url.to_string())
                        .or_insert_with(|| record.user_id.clone());
                }
            }

            processed += chunk.len() as u64;
            self.report_progress(processed, total, &mut last_percent);
            if chunk.len() < chunk_size {
                break;
            }
            after = chunk.last().map(|record| record.id.clone());
            self.pause().await;
        }

        let mut thumbnail_bytes = 0u64;
        let mut after: Option<String> = None;
        loop {
            let chunk = self
                .db
                .thumbnail_size_chunk(after.as_deref(), chunk_size)
                .await?;
            for row in &chunk {
                let size = estimate_thumbnail(
                    &row.url,
                    row.blob_len.unwrap_or(0).max(0) as u64,
                    row.content_type.as_deref(),
                );
                thumbnail_bytes += size;
                if let Some(user_id) = first_user_for_url.get(&row.url) {
                    user_bytes.add_existing(user_id, size);
                }
            }

            processed += chunk.len() as u64;
            self.report_progress(processed, total, &mut last_percent);
            if chunk.len() < chunk_size {
                break;
            }
            after = chunk.last().map(|row| row.url.clone());
            self.pause().await;
        }

        let content_duplicates = if self.config.content_hashing {
            Some(self.count_content_duplicates(chunk_size).await?)
        } else {
            None
        };

        let top_user_by_size = user_bytes.top();
        Ok(DetailedStats {
            user_bytes: user_bytes.into_vec(),
            total_bytes: media_bytes + thumbnail_bytes,
            media_bytes,
            thumbnail_bytes,
            top_user_by_size,
            content_duplicates,
            computed_at: now_millis(),
        })
    }

    async fn count_content_duplicates(&self, chunk_size: usize) -> Result<u64, StorageError> {
        let mut seen: HashSet<[u8; 32]> = HashSet::new();
        let mut duplicates = 0u64;
        let mut after: Option<String> = None;

        loop {
            let chunk = self
                .db
                .thumbnail_blob_chunk(after.as_deref(), chunk_size)
                .await?;
            for (_, blob) in &chunk {
                let digest: [u8; 32] = Sha256::digest(blob).into();
                if !seen.insert(digest) {
                    duplicates += 1;
                }
            }
            if chunk.len() < chunk_size {
                break;
            }
            after = chunk.last().map(|(url, _)| url.clone());
            self.pause().await;
        }

        Ok(duplicates)
    }
}
