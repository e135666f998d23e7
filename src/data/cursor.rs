//! Pull-based cursors over streamed queries
//!
//! A cursor wraps a lazily-evaluated row stream. Records are decoded one at
//! a time as the caller pulls them, and dropping the cursor ends the scan,
//! so callers that stop early never touch the rest of the collection.

use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::error::StorageError;

/// Sequential, stateful iteration handle over a collection
pub struct Cursor<'a, T> {
    rows: BoxStream<'a, Result<T, StorageError>>,
    position: u64,
}

impl<'a, T> Cursor<'a, T> {
    pub(crate) fn new(rows: BoxStream<'a, Result<T, StorageError>>) -> Self {
        Self { rows, position: 0 }
    }

    /// Pull the next record, or `None` once the scan is exhausted
    pub async fn next(&mut self) -> Result<Option<T>, StorageError> {
        let next = self.rows.try_next().await?;
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }

    /// Step over `steps` raw records without returning them.
    ///
    /// Returns how many were actually skipped (fewer at end of collection).
    pub async fn advance(&mut self, steps: u64) -> Result<u64, StorageError> {
        let mut skipped = 0;
        while skipped < steps {
            if self.rows.try_next().await?.is_none() {
                break;
            }
            skipped += 1;
        }
        self.position += skipped;
        Ok(skipped)
    }

    /// Raw records consumed so far, skipped ones included
    pub fn position(&self) -> u64 {
        self.position
    }
}
