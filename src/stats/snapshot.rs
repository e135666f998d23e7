//! Statistics snapshots and progress reporting

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user and the value they lead with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTotal {
    pub user_id: String,
    pub value: u64,
}

/// Fast snapshot returned by `get_storage_usage`
///
/// Byte fields are `None` until a detailed snapshot is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub total_videos: u64,
    pub total_users: u64,
    pub total_thumbnails: u64,
    pub cached_thumbnails: u64,
    pub expired_thumbnails: u64,
    pub failed_thumbnails: u64,
    /// Cached entries no media record references
    pub orphaned_thumbnails: u64,
    /// Media whose thumbnail is missing or not HTTP(S)
    pub invalid_thumbnails: u64,
    /// Referenced URLs with no cache entry
    pub missing_thumbnails: u64,
    /// Surplus media references to an already referenced URL
    pub duplicate_thumbnails: u64,
    pub last_scraped: Option<i64>,
    pub top_user_by_count: Option<UserTotal>,
    pub top_user_by_size: Option<UserTotal>,
    pub total_bytes: Option<u64>,
    pub thumbnail_bytes: Option<u64>,
    pub content_duplicates: Option<u64>,
    pub database_bytes_estimate: Option<u64>,
    pub computed_at: i64,
    /// A detailed recompute has been requested and is not merged yet
    pub detailed_pending: bool,
}

/// Result of the chunked background scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStats {
    /// Per-user byte totals in first-seen order
    pub user_bytes: Vec<UserTotal>,
    pub total_bytes: u64,
    pub media_bytes: u64,
    pub thumbnail_bytes: u64,
    pub top_user_by_size: Option<UserTotal>,
    /// Byte-identical cached blobs beyond the first, when hashing is enabled
    pub content_duplicates: Option<u64>,
    pub computed_at: i64,
}

/// Detailed computation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StatsProgress {
    Idle,
    Calculating { percent: u8 },
    Complete,
    Error { message: String },
}

/// Per-user accumulators that remember first-seen order.
///
/// `top()` is a strict max over that order, so ties go to the user seen
/// first.
#[derive(Debug, Default)]
pub(crate) struct UserTotals {
    order: Vec<UserTotal>,
    index: HashMap<String, usize>,
}

impl UserTotals {
    pub fn add(&mut self, user_id: &str, amount: u64) {
        match self.index.get(user_id) {
            Some(&slot) => self.order[slot].value += amount,
            None => {
                self.index.insert(user_id.to_string(), self.order.len());
                self.order.push(UserTotal {
                    user_id: user_id.to_string(),
                    value: amount,
                });
            }
        }
    }

    /// Add to a user already seen; unknown users are ignored
    pub fn add_existing(&mut self, user_id: &str, amount: u64) {
        if let Some(&slot) = self.index.get(user_id) {
            self.order[slot].value += amount;
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn top(&self) -> Option<UserTotal> {
        let mut best: Option<&UserTotal> = None;
        for total in &self.order {
            if best.is_none_or(|b| total.value > b.value) {
                best = Some(total);
            }
        }
        best.cloned()
    }

    pub fn into_vec(self) -> Vec<UserTotal> {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_first_seen() {
        let mut totals = UserTotals::default();
        totals.add("bob", 2);
        totals.add("alice", 1);
        totals.add("alice", 1);

        assert_eq!(
            totals.top(),
            Some(UserTotal {
                user_id: "bob".to_string(),
                value: 2
            })
        );

        totals.add("alice", 1);
        assert_eq!(totals.top().unwrap().user_id, "alice");
        assert_eq!(totals.len(), 2);
    }

    #[test]
    fn empty_has_no_top() {
        assert!(UserTotals::default().top().is_none());
    }

    #[test]
    fn progress_serializes_with_state_tag() {
        let json = serde_json::to_value(StatsProgress::Calculating { percent: 35 }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "calculating", "percent": 35}));
    }
}
