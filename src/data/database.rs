//! SQLite record store
//!
//! All persistence goes through this module. The `media` and `thumbnails`
//! collections are plain tables keyed by their primary key; `kv_store` holds
//! engine state that is not a record (statistics snapshots, job run state).

use futures::StreamExt;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use super::cursor::Cursor;
use super::models::*;
use crate::error::StorageError;

/// Ids per statement batch inside one transaction
const BATCH_CHUNK: usize = 200;

const UPSERT_MEDIA_SQL: &str = r#"
    INSERT INTO media (
        id, user_id, platform, original_url, thumbnail_url,
        scraped_at, export_flags, exported, extra
    ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
    ON CONFLICT(id) DO UPDATE SET
        user_id = excluded.user_id,
        platform = excluded.platform,
        original_url = excluded.original_url,
        thumbnail_url = excluded.thumbnail_url,
        scraped_at = excluded.scraped_at,
        export_flags = excluded.export_flags,
        exported = NULL,
        extra = excluded.extra
"#;

const INSERT_MEDIA_IF_ABSENT_SQL: &str = r#"
    INSERT OR IGNORE INTO media (
        id, user_id, platform, original_url, thumbnail_url,
        scraped_at, export_flags, exported, extra
    ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
"#;

const UPSERT_THUMBNAIL_SQL: &str = r#"
    INSERT INTO thumbnails (url, blob, content_type, ttl, error)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(url) DO UPDATE SET
        blob = excluded.blob,
        content_type = excluded.content_type,
        ttl = excluded.ttl,
        error = excluded.error
"#;

const INSERT_THUMBNAIL_IF_ABSENT_SQL: &str = r#"
    INSERT OR IGNORE INTO thumbnails (url, blob, content_type, ttl, error)
    VALUES (?, ?, ?, ?, ?)
"#;

pub(crate) const MEDIA_COLUMNS: &str =
    "id, user_id, platform, original_url, thumbnail_url, scraped_at, export_flags, exported, extra";

/// Connection tuning for the pool
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&crate::config::DatabaseConfig> for DatabaseOptions {
    fn from(config: &crate::config::DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }
}

/// Storage engine handle.
///
/// Construct once at the application entry point and share it (`Arc`) with
/// every component that needs it. The underlying pool is opened lazily by
/// [`Database::init`]; every operation awaits initialization first.
pub struct Database {
    path: PathBuf,
    options: DatabaseOptions,
    pool: OnceCell<SqlitePool>,
    open_attempts: AtomicUsize,
    /// Set by every record write; consumed by the statistics fast path
    stats_dirty: Arc<AtomicBool>,
}

/// Lightweight media projection for the statistics fast path
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaSummaryRow {
    pub user_id: String,
    pub scraped_at: i64,
    pub thumbnail_url: Option<String>,
}

/// Thumbnail projection without the blob
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ThumbnailStateRow {
    pub url: String,
    pub ttl: i64,
    pub error: bool,
}

/// Thumbnail projection with the blob length instead of the blob
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ThumbnailSizeRow {
    pub url: String,
    pub blob_len: Option<i64>,
    pub content_type: Option<String>,
}

fn encode_extra(record: &MediaRecord) -> Result<Option<String>, StorageError> {
    if record.extra.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&record.extra)?))
}

fn observe(operation: &str, collection: Collection, started: Instant) {
    crate::metrics::observe_store_operation(operation, collection.as_str(), started.elapsed());
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Create an unopened handle for the database at `path`
    pub fn new(path: impl Into<PathBuf>, options: DatabaseOptions) -> Self {
        Self {
            path: path.into(),
            options,
            pool: OnceCell::new(),
            open_attempts: AtomicUsize::new(0),
            stats_dirty: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a handle and open it immediately
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or migrated
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        let db = Self::new(path, DatabaseOptions::default());
        db.init().await?;
        Ok(db)
    }

    /// Open the database and run pending migrations.
    ///
    /// Idempotent. Concurrent callers share one in-flight attempt; a failed
    /// attempt leaves the handle unopened so the next call retries cleanly.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.pool().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// Number of times the engine has actually been opened (or tried to)
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn pool(&self) -> Result<&SqlitePool, StorageError> {
        self.pool
            .get_or_try_init(|| async {
                self.open_attempts.fetch_add(1, Ordering::SeqCst);
                Self::open(&self.path, &self.options).await
            })
            .await
    }

    async fn open(path: &Path, options: &DatabaseOptions) -> Result<SqlitePool, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Initialization(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Failed to open database");
                StorageError::Initialization(format!("{}: {}", path.display(), e))
            })?;

        // Run migrations
        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            tracing::error!("Migration failed: {}", e);
            pool.close().await;
            return Err(e.into());
        }

        tracing::info!(path = %path.display(), "Database opened and migrated");
        Ok(pool)
    }

    /// Close the pool. Later operations fail with `Unavailable`.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            tracing::info!("Database closed");
        }
    }

    /// Run `body` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The transaction lives on its own task, which owns the connection, so
    /// it always ends in COMMIT or ROLLBACK even if the caller is dropped
    /// mid-batch. A commit marks statistics dirty.
    pub(crate) async fn write_transaction<T, F>(&self, body: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, StorageError>>
            + Send
            + 'static,
    {
        let pool = self.pool().await?.clone();
        let dirty = Arc::clone(&self.stats_dirty);

        let task = tokio::spawn(async move {
            let mut conn = pool.acquire().await?;
            sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

            let error = match body(&mut *conn).await {
                Ok(value) => {
                    let committed = sqlx::query("COMMIT").execute(&mut *conn).await;
                    match committed {
                        Ok(_) => {
                            dirty.store(true, Ordering::Release);
                            return Ok(value);
                        }
                        Err(e) => StorageError::from(e),
                    }
                }
                Err(error) => error,
            };

            let rolled_back = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            if let Err(e) = rolled_back {
                tracing::warn!(error = %e, "Rollback failed, discarding connection");
                drop(conn.detach());
            }
            Err(error)
        });

        task.await
            .map_err(|e| StorageError::Internal(anyhow::anyhow!("write transaction aborted: {}", e)))?
    }

    // =========================================================================
    // Statistics invalidation
    // =========================================================================

    pub(crate) fn mark_dirty(&self) {
        self.stats_dirty.store(true, Ordering::Release);
    }

    /// Read and clear the dirty flag
    pub(crate) fn take_dirty(&self) -> bool {
        self.stats_dirty.swap(false, Ordering::AcqRel)
    }

    pub fn is_dirty(&self) -> bool {
        self.stats_dirty.load(Ordering::Acquire)
    }

    // =========================================================================
    // Media
    // =========================================================================

    /// Upsert one media record (legacy `exported` is folded in on write)
    pub async fn put_media(&self, record: &MediaRecord) -> Result<(), StorageError> {
        let started = Instant::now();
        let pool = self.pool().await?;

        let mut record = record.clone();
        record.migrate_legacy();
        let extra = encode_extra(&record)?;

        sqlx::query(UPSERT_MEDIA_SQL)
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.platform)
            .bind(&record.original_url)
            .bind(&record.thumbnail_url)
            .bind(record.scraped_at)
            .bind(record.export_flags.bits() as i64)
            .bind(extra)
            .execute(pool)
            .await?;

        self.mark_dirty();
        observe("put", Collection::Media, started);
        Ok(())
    }

    /// Upsert many media records atomically.
    ///
    /// A record carrying a `data:` thumbnail only replaces a stored record
    /// whose thumbnail is also a `data:` URI; otherwise the stored record is
    /// kept as is and counted in `preserved`.
    pub async fn put_all_media(&self, records: &[MediaRecord]) -> Result<SaveReport, StorageError> {
        if records.is_empty() {
            return Ok(SaveReport::default());
        }

        let started = Instant::now();
        let records = records.to_vec();

        let report = self
            .write_transaction(move |conn| {
                Box::pin(async move {
                    let mut report = SaveReport::default();

                    for mut record in records {
                        let incoming_is_data_uri = record
                            .thumbnail_url
                            .as_deref()
                            .is_some_and(is_data_uri);

                        if incoming_is_data_uri {
                            let existing = sqlx::query("SELECT thumbnail_url FROM media WHERE id = ?")
                                .bind(&record.id)
                                .fetch_optional(&mut *conn)
                                .await?;

                            if let Some(row) = existing {
                                let stored: Option<String> = row.try_get("thumbnail_url")?;
                                if !stored.as_deref().is_some_and(is_data_uri) {
                                    report.preserved += 1;
                                    continue;
                                }
                            }
                        }

                        record.migrate_legacy();
                        let extra = encode_extra(&record)?;

                        sqlx::query(UPSERT_MEDIA_SQL)
                            .bind(&record.id)
                            .bind(&record.user_id)
                            .bind(&record.platform)
                            .bind(&record.original_url)
                            .bind(&record.thumbnail_url)
                            .bind(record.scraped_at)
                            .bind(record.export_flags.bits() as i64)
                            .bind(extra)
                            .execute(&mut *conn)
                            .await?;
                        report.written += 1;
                    }

                    Ok::<_, StorageError>(report)
                })
            })
            .await?;

        observe("put_all", Collection::Media, started);
        tracing::debug!(
            written = report.written,
            preserved = report.preserved,
            "Media batch saved"
        );
        Ok(report)
    }

    /// Insert media records whose id is not stored yet, atomically.
    ///
    /// # Returns
    /// Number of records inserted
    pub async fn insert_media_if_absent(&self, records: &[MediaRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let records = records.to_vec();
        self.write_transaction(move |conn| {
            Box::pin(async move {
                let mut inserted = 0;
                for mut record in records {
                    record.migrate_legacy();
                    let extra = encode_extra(&record)?;

                    let done = sqlx::query(INSERT_MEDIA_IF_ABSENT_SQL)
                        .bind(&record.id)
                        .bind(&record.user_id)
                        .bind(&record.platform)
                        .bind(&record.original_url)
                        .bind(&record.thumbnail_url)
                        .bind(record.scraped_at)
                        .bind(record.export_flags.bits() as i64)
                        .bind(extra)
                        .execute(&mut *conn)
                        .await?;
                    inserted += done.rows_affected() as usize;
                }
                Ok::<_, StorageError>(inserted)
            })
        })
        .await
    }

    /// Get media record by id
    pub async fn get_media(&self, id: &str) -> Result<Option<MediaRecord>, StorageError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {} FROM media WHERE id = ?",
            MEDIA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(MediaRow::into_record).transpose()
    }

    /// Load the whole media collection in key order
    pub async fn get_all_media(&self) -> Result<Vec<MediaRecord>, StorageError> {
        let started = Instant::now();
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {} FROM media ORDER BY id",
            MEDIA_COLUMNS
        ))
        .fetch_all(pool)
        .await?;

        let records = rows
            .into_iter()
            .map(MediaRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        observe("get_all", Collection::Media, started);
        Ok(records)
    }

    // =========================================================================
    // Thumbnails
    // =========================================================================

    /// Upsert a thumbnail entry as given (no recompression at this layer)
    pub async fn put_thumbnail(&self, entry: &ThumbnailEntry) -> Result<(), StorageError> {
        let started = Instant::now();
        let pool = self.pool().await?;

        sqlx::query(UPSERT_THUMBNAIL_SQL)
            .bind(&entry.url)
            .bind(entry.blob())
            .bind(entry.content_type())
            .bind(entry.ttl)
            .bind(entry.error())
            .execute(pool)
            .await?;

        self.mark_dirty();
        observe("put", Collection::Thumbnails, started);
        Ok(())
    }

    /// Upsert (or, with `only_absent`, insert-if-absent) many entries atomically
    ///
    /// # Returns
    /// Number of entries written
    pub async fn put_all_thumbnails(
        &self,
        entries: &[ThumbnailEntry],
        only_absent: bool,
    ) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let sql = if only_absent {
            INSERT_THUMBNAIL_IF_ABSENT_SQL
        } else {
            UPSERT_THUMBNAIL_SQL
        };

        let entries = entries.to_vec();
        self.write_transaction(move |conn| {
            Box::pin(async move {
                let mut written = 0;
                for entry in &entries {
                    let done = sqlx::query(sql)
                        .bind(&entry.url)
                        .bind(entry.blob())
                        .bind(entry.content_type())
                        .bind(entry.ttl)
                        .bind(entry.error())
                        .execute(&mut *conn)
                        .await?;
                    written += done.rows_affected() as usize;
                }
                Ok::<_, StorageError>(written)
            })
        })
        .await
    }

    /// Get thumbnail entry by source URL
    pub async fn get_thumbnail(&self, url: &str) -> Result<Option<ThumbnailEntry>, StorageError> {
        let started = Instant::now();
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, ThumbnailRow>(
            "SELECT url, blob, content_type, ttl, error FROM thumbnails WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(pool)
        .await?;

        observe("get", Collection::Thumbnails, started);
        row.map(ThumbnailRow::into_entry).transpose()
    }

    /// Load the whole thumbnail collection in key order
    pub async fn get_all_thumbnails(&self) -> Result<Vec<ThumbnailEntry>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ThumbnailRow>(
            "SELECT url, blob, content_type, ttl, error FROM thumbnails ORDER BY url",
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(ThumbnailRow::into_entry).collect()
    }

    // =========================================================================
    // Collection-generic operations
    // =========================================================================

    /// Upsert a single record into its collection
    pub async fn save(&self, item: &StoreItem) -> Result<(), StorageError> {
        match item {
            StoreItem::Media(record) => self.put_media(record).await,
            StoreItem::Thumbnail(entry) => self.put_thumbnail(entry).await,
        }
    }

    /// Upsert records into `collection` in one transaction
    ///
    /// # Errors
    /// Returns `Validation` if an item belongs to another collection
    pub async fn save_all(
        &self,
        collection: Collection,
        items: &[StoreItem],
    ) -> Result<SaveReport, StorageError> {
        if let Some(stray) = items.iter().find(|item| item.collection() != collection) {
            return Err(StorageError::Validation(format!(
                "record {} does not belong to collection {}",
                stray.key(),
                collection
            )));
        }

        match collection {
            Collection::Media => {
                let records: Vec<MediaRecord> = items
                    .iter()
                    .filter_map(|item| match item {
                        StoreItem::Media(record) => Some(record.clone()),
                        StoreItem::Thumbnail(_) => None,
                    })
                    .collect();
                self.put_all_media(&records).await
            }
            Collection::Thumbnails => {
                let entries: Vec<ThumbnailEntry> = items
                    .iter()
                    .filter_map(|item| match item {
                        StoreItem::Thumbnail(entry) => Some(entry.clone()),
                        StoreItem::Media(_) => None,
                    })
                    .collect();
                let written = self.put_all_thumbnails(&entries, false).await?;
                Ok(SaveReport {
                    written,
                    preserved: 0,
                })
            }
        }
    }

    /// Load an entire collection
    pub async fn get_all(&self, collection: Collection) -> Result<Vec<StoreItem>, StorageError> {
        Ok(match collection {
            Collection::Media => self
                .get_all_media()
                .await?
                .into_iter()
                .map(StoreItem::Media)
                .collect(),
            Collection::Thumbnails => self
                .get_all_thumbnails()
                .await?
                .into_iter()
                .map(StoreItem::Thumbnail)
                .collect(),
        })
    }

    /// Delete one record by key
    ///
    /// # Returns
    /// `true` if a record was removed
    pub async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let started = Instant::now();
        let pool = self.pool().await?;
        let sql = match collection {
            Collection::Media => "DELETE FROM media WHERE id = ?",
            Collection::Thumbnails => "DELETE FROM thumbnails WHERE url = ?",
        };

        let result = sqlx::query(sql).bind(key).execute(pool).await?;
        self.mark_dirty();
        observe("delete", collection, started);
        Ok(result.rows_affected() > 0)
    }

    /// Delete many records by key atomically
    ///
    /// # Returns
    /// Number of records removed
    pub async fn delete_batch(
        &self,
        collection: Collection,
        keys: &[String],
    ) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let key_column = match collection {
            Collection::Media => "id",
            Collection::Thumbnails => "url",
        };

        let keys = keys.to_vec();
        let removed = self
            .write_transaction(move |conn| {
                Box::pin(async move {
                    let mut removed = 0;
                    for chunk in keys.chunks(BATCH_CHUNK) {
                        let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                        let sql = format!(
                            "DELETE FROM {} WHERE {} IN ({})",
                            collection.as_str(),
                            key_column,
                            placeholders
                        );

                        let mut query = sqlx::query(&sql);
                        for key in chunk {
                            query = query.bind(key);
                        }
                        removed += query.execute(&mut *conn).await?.rows_affected();
                    }
                    Ok::<_, StorageError>(removed)
                })
            })
            .await?;

        observe("delete_batch", collection, started);
        tracing::info!(collection = %collection, removed, "Batch delete committed");
        Ok(removed)
    }

    /// Remove every record from a collection
    pub async fn clear(&self, collection: Collection) -> Result<u64, StorageError> {
        let pool = self.pool().await?;
        let sql = match collection {
            Collection::Media => "DELETE FROM media",
            Collection::Thumbnails => "DELETE FROM thumbnails",
        };

        let result = sqlx::query(sql).execute(pool).await?;
        self.mark_dirty();
        tracing::info!(collection = %collection, removed = result.rows_affected(), "Collection cleared");
        Ok(result.rows_affected())
    }

    /// Cardinality of a collection
    pub async fn count(&self, collection: Collection) -> Result<u64, StorageError> {
        let pool = self.pool().await?;
        let sql = match collection {
            Collection::Media => "SELECT COUNT(*) FROM media",
            Collection::Thumbnails => "SELECT COUNT(*) FROM thumbnails",
        };

        let count: i64 = sqlx::query_scalar(sql).fetch_one(pool).await?;
        Ok(count as u64)
    }

    /// Cursor over a whole collection in natural key order
    pub async fn store_cursor(
        &self,
        collection: Collection,
    ) -> Result<Cursor<'_, StoreItem>, StorageError> {
        let pool = self.pool().await?;

        let rows = match collection {
            Collection::Media => sqlx::query_as::<_, MediaRow>(
                "SELECT id, user_id, platform, original_url, thumbnail_url, scraped_at, export_flags, exported, extra FROM media ORDER BY id",
            )
            .fetch(pool)
            .map(|row| {
                row.map_err(StorageError::from)
                    .and_then(MediaRow::into_record)
                    .map(StoreItem::Media)
            })
            .boxed(),
            Collection::Thumbnails => sqlx::query_as::<_, ThumbnailRow>(
                "SELECT url, blob, content_type, ttl, error FROM thumbnails ORDER BY url",
            )
            .fetch(pool)
            .map(|row| {
                row.map_err(StorageError::from)
                    .and_then(ThumbnailRow::into_entry)
                    .map(StoreItem::Thumbnail)
            })
            .boxed(),
        };

        Ok(Cursor::new(rows))
    }

    // =========================================================================
    // Statistics scans
    // =========================================================================

    /// Cursor over the columns the fast statistics path needs
    pub(crate) async fn media_summaries(&self) -> Result<Cursor<'_, MediaSummaryRow>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, MediaSummaryRow>(
            "SELECT user_id, scraped_at, thumbnail_url FROM media ORDER BY id",
        )
        .fetch(pool)
        .map(|row| row.map_err(StorageError::from))
        .boxed();
        Ok(Cursor::new(rows))
    }

    /// Cursor over thumbnail freshness state, blobs excluded
    pub(crate) async fn thumbnail_states(&self) -> Result<Cursor<'_, ThumbnailStateRow>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ThumbnailStateRow>(
            "SELECT url, ttl, error FROM thumbnails ORDER BY url",
        )
        .fetch(pool)
        .map(|row| row.map_err(StorageError::from))
        .boxed();
        Ok(Cursor::new(rows))
    }

    /// Next chunk of media records after `after_id` in key order
    pub(crate) async fn media_chunk(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MediaRecord>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {} FROM media WHERE id > ? ORDER BY id LIMIT ?",
            MEDIA_COLUMNS
        ))
        .bind(after_id.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(MediaRow::into_record).collect()
    }

    /// Next chunk of thumbnail sizes after `after_url` in key order
    pub(crate) async fn thumbnail_size_chunk(
        &self,
        after_url: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ThumbnailSizeRow>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ThumbnailSizeRow>(
            "SELECT url, length(blob) AS blob_len, content_type FROM thumbnails WHERE url > ? ORDER BY url LIMIT ?",
        )
        .bind(after_url.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Next chunk of cached blobs after `after_url`, for content hashing
    pub(crate) async fn thumbnail_blob_chunk(
        &self,
        after_url: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(
            "SELECT url, blob FROM thumbnails WHERE error = 0 AND url > ? ORDER BY url LIMIT ?",
        )
        .bind(after_url.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Distinct thumbnail URLs referenced by media, ascending
    pub(crate) async fn referenced_thumbnail_urls(&self) -> Result<Vec<String>, StorageError> {
        let pool = self.pool().await?;
        let urls = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT thumbnail_url FROM media WHERE thumbnail_url IS NOT NULL ORDER BY thumbnail_url",
        )
        .fetch_all(pool)
        .await?;
        Ok(urls)
    }

    /// Whole-file size from SQLite page accounting
    pub async fn database_size_estimate(&self) -> Result<u64, StorageError> {
        let pool = self.pool().await?;
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(pool)
            .await?;
        Ok((page_count.max(0) * page_size.max(0)) as u64)
    }

    // =========================================================================
    // Engine state (not records; never marks statistics dirty)
    // =========================================================================

    pub async fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        let pool = self.pool().await?;
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        Ok(value)
    }

    pub async fn set_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete_state(&self, key: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(pool)
            .await?;
        Ok(())
    }
}
