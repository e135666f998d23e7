//! Thumbnail storage module
//!
//! Handles:
//! - Thumbnail cache with TTL freshness and negative caching
//! - Network fetching and best-effort recompression
//! - Background cache population

mod compress;
mod fetcher;
mod population;
mod thumbnails;

pub use compress::{CompressionError, Recompressed, recompress};
pub use fetcher::{FetchError, FetchedThumbnail, HttpThumbnailFetcher, ThumbnailFetcher};
pub use population::{CachePopulator, PopulationState, PopulationStatus};
pub use thumbnails::{CacheLookup, Resolution, ThumbnailCache};
