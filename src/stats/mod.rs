//! Storage statistics
//!
//! - Fast path: counts and cache classification, cached until the next write
//! - Detailed path: chunked byte-size scan, persisted with its own TTL

mod aggregator;
mod size;
mod snapshot;

pub use aggregator::StatsAggregator;
pub use size::{estimate_media, estimate_thumbnail, estimate_value};
pub use snapshot::{DetailedStats, StatsProgress, StorageUsage, UserTotal};
