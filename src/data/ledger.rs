//! Export-flag bookkeeping
//!
//! Each export surface ORs its own bit into the records it consumed, so
//! "new for CSV" and "new for thumbnails" are tracked independently on the
//! same record.

use std::time::Instant;

use super::database::Database;
use super::models::*;
use crate::error::StorageError;

const UPDATE_FLAGS_SQL: &str = "UPDATE media SET export_flags = ?, exported = NULL WHERE id = ?";

impl Database {
    /// Mark `ids` as consumed by the export channels in `flags`.
    ///
    /// Missing ids are skipped. Records still carrying the legacy `exported`
    /// boolean are migrated in the same write. All reads and writes share one
    /// transaction, and OR-ing makes repeated calls idempotent.
    ///
    /// # Returns
    /// Number of records found and updated
    pub async fn mark_as_exported(
        &self,
        ids: &[String],
        flags: ExportFlags,
    ) -> Result<usize, StorageError> {
        if flags.is_empty() || ids.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let ids_len = ids.len();
        let ids = ids.to_vec();

        let updated = self
            .write_transaction(move |conn| {
                Box::pin(async move {
                    let mut updated = 0;
                    for id in &ids {
                        let row = sqlx::query_as::<_, (i64, Option<bool>)>(
                            "SELECT export_flags, exported FROM media WHERE id = ?",
                        )
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?;

                        let Some((stored, legacy_exported)) = row else {
                            continue;
                        };

                        let mut current = ExportFlags::from_bits(stored as u32);
                        if legacy_exported == Some(true) {
                            current |= ExportFlags::ALL_EXPORT;
                        }
                        let next = current | flags;

                        sqlx::query(UPDATE_FLAGS_SQL)
                            .bind(next.bits() as i64)
                            .bind(id)
                            .execute(&mut *conn)
                            .await?;
                        updated += 1;
                    }
                    Ok::<_, StorageError>(updated)
                })
            })
            .await?;

        crate::metrics::observe_store_operation(
            "mark_exported",
            Collection::Media.as_str(),
            started.elapsed(),
        );
        tracing::debug!(requested = ids_len, updated, flags = %flags, "Marked as exported");
        Ok(updated)
    }
}
