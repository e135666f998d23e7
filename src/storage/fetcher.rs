//! Network fetching of thumbnail images

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ThumbnailConfig;

/// Largest thumbnail body accepted from the network
const MAX_THUMBNAIL_BYTES: usize = 8 * 1024 * 1024;

/// A failed thumbnail fetch. Turns into a negative-cache entry, never a
/// failed batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("not an image: {0}")]
    NotAnImage(String),

    #[error("body too large: {0} bytes")]
    TooLarge(usize),

    #[error("empty body")]
    Empty,
}

/// Downloaded thumbnail body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedThumbnail {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Source of thumbnail bytes
pub trait ThumbnailFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedThumbnail, FetchError>> + Send;
}

impl<F: ThumbnailFetcher> ThumbnailFetcher for Arc<F> {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedThumbnail, FetchError>> + Send {
        self.as_ref().fetch(url)
    }
}

/// `reqwest`-backed fetcher
#[derive(Clone)]
pub struct HttpThumbnailFetcher {
    http_client: Arc<reqwest::Client>,
}

impl HttpThumbnailFetcher {
    /// Build a client with the configured timeout and user agent
    pub fn new(config: &ThumbnailConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(Arc::new(client)))
    }

    pub fn with_client(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }
}

impl ThumbnailFetcher for HttpThumbnailFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedThumbnail, FetchError> {
        let response = self
            .http_client
            .get(url)
            .header("Accept", "image/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();

        if !content_type.starts_with("image/") {
            return Err(FetchError::NotAnImage(content_type));
        }

        if let Some(length) = response.content_length() {
            if length as usize > MAX_THUMBNAIL_BYTES {
                return Err(FetchError::TooLarge(length as usize));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }
        if bytes.len() > MAX_THUMBNAIL_BYTES {
            return Err(FetchError::TooLarge(bytes.len()));
        }

        tracing::debug!(url, size = bytes.len(), content_type = %content_type, "Fetched thumbnail");
        Ok(FetchedThumbnail {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
