//! Background cache population
//!
//! Walks every distinct valid thumbnail URL referenced by media and resolves
//! it through the thumbnail cache, pausing between network fetches. Run state
//! is persisted after every item so an interrupted run resumes on startup.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::fetcher::ThumbnailFetcher;
use super::thumbnails::{Resolution, ThumbnailCache};
use crate::data::{Database, ThumbnailRef, now_millis};
use crate::error::StorageError;

const STATE_KEY: &str = "cache_population.state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopulationStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Persisted run state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationState {
    pub status: PopulationStatus,
    /// URLs processed so far
    pub progress: usize,
    pub total: usize,
    /// Network fetches attempted in this run
    pub fetched: usize,
    /// Fetches that ended in a negative entry
    pub failed: usize,
    pub updated_at: i64,
    /// Last URL processed; a resumed run continues after it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for PopulationState {
    fn default() -> Self {
        Self {
            status: PopulationStatus::Idle,
            progress: 0,
            total: 0,
            fetched: 0,
            failed: 0,
            updated_at: 0,
            last_url: None,
            error: None,
        }
    }
}

/// Cache population job
pub struct CachePopulator<F> {
    db: Arc<Database>,
    cache: ThumbnailCache,
    fetcher: Arc<F>,
    fetch_delay: Duration,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl<F: ThumbnailFetcher> CachePopulator<F> {
    pub fn new(
        db: Arc<Database>,
        cache: ThumbnailCache,
        fetcher: Arc<F>,
        fetch_delay: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            fetcher,
            fetch_delay,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Last persisted run state
    pub async fn state(&self) -> Result<PopulationState, StorageError> {
        match self.db.get_state(STATE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(PopulationState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask a running job to stop after the current item
    pub fn stop(&self) {
        if self.is_running() {
            self.stop_requested.store(true, Ordering::Release);
            tracing::info!("Cache population stop requested");
        }
    }

    fn begin(&self) -> Result<(), StorageError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(StorageError::WriteConflict(
                "cache population is already running".to_string(),
            ));
        }
        self.stop_requested.store(false, Ordering::Release);
        Ok(())
    }

    /// Run a full population in the current task
    pub async fn run(&self) -> Result<PopulationState, StorageError> {
        self.begin()?;
        self.execute(false).await
    }

    /// Start a run in the background. With `resume`, URLs up to the last
    /// one the previous run processed are skipped.
    ///
    /// # Errors
    /// Returns `WriteConflict` if a run is already in progress
    pub fn start(self: &Arc<Self>, resume: bool) -> Result<(), StorageError> {
        self.begin()?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.execute(resume).await {
                tracing::error!(error = %e, "Cache population failed");
            }
        });
        Ok(())
    }

    /// Resume a run that was still `running` when the process went away
    ///
    /// # Returns
    /// `true` if a run was resumed
    pub async fn resume_if_interrupted(self: &Arc<Self>) -> Result<bool, StorageError> {
        let state = self.state().await?;
        if state.status != PopulationStatus::Running || self.is_running() {
            return Ok(false);
        }

        tracing::info!(
            progress = state.progress,
            total = state.total,
            last_url = ?state.last_url,
            "Resuming interrupted cache population"
        );
        self.start(true)?;
        Ok(true)
    }

    async fn execute(&self, resume: bool) -> Result<PopulationState, StorageError> {
        let result = self.walk(resume).await;

        if let Err(e) = &result {
            let mut state = self.state().await.unwrap_or_default();
            state.status = PopulationStatus::Failed;
            state.error = Some(e.to_string());
            state.updated_at = now_millis();
            if let Err(persist_error) = self.persist(&state).await {
                tracing::warn!(error = %persist_error, "Failed to persist population state");
            }
        }

        self.running.store(false, Ordering::Release);
        result
    }

    async fn persist(&self, state: &PopulationState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(state)?;
        self.db.set_state(STATE_KEY, &raw).await
    }

    async fn walk(&self, resume: bool) -> Result<PopulationState, StorageError> {
        let resume_after = if resume {
            self.state().await?.last_url
        } else {
            None
        };

        let mut urls: Vec<String> = self
            .db
            .referenced_thumbnail_urls()
            .await?
            .iter()
            .filter_map(|raw| ThumbnailRef::classify(Some(raw)).valid_url().map(str::to_string))
            .collect();
        urls.sort();
        urls.dedup();

        let total = urls.len();
        let start = resume_after
            .as_deref()
            .map_or(0, |last| urls.partition_point(|url| url.as_str() <= last));
        let mut state = PopulationState {
            status: PopulationStatus::Running,
            progress: start,
            total,
            updated_at: now_millis(),
            last_url: resume_after,
            ..PopulationState::default()
        };
        self.persist(&state).await?;
        tracing::info!(total, skipped = start, "Cache population started");

        for (index, url) in urls.iter().enumerate().skip(state.progress) {
            if self.stop_requested.load(Ordering::Acquire) {
                state.status = PopulationStatus::Stopped;
                state.updated_at = now_millis();
                self.persist(&state).await?;
                tracing::info!(progress = state.progress, total, "Cache population stopped");
                return Ok(state);
            }

            let resolution = self
                .cache
                .resolve(url, self.fetcher.as_ref(), now_millis())
                .await?;

            if matches!(resolution, Resolution::FetchFailed(_)) {
                state.failed += 1;
            }

            state.progress = index + 1;
            state.last_url = Some(url.clone());
            state.updated_at = now_millis();
            if resolution.fetched() {
                state.fetched += 1;
            }
            self.persist(&state).await?;

            if resolution.fetched() && state.progress < total {
                tokio::time::sleep(self.fetch_delay).await;
            }
        }

        state.status = PopulationStatus::Completed;
        state.updated_at = now_millis();
        self.persist(&state).await?;
        tracing::info!(
            total,
            fetched = state.fetched,
            failed = state.failed,
            "Cache population completed"
        );
        Ok(state)
    }
}
