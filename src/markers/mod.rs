// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-category processing markers.
//!
//! A marker records how many sleeves of a category the last successful
//! pass processed, plus a small sample of their ids for diagnostics. The
//! next pass only needs the suffix beyond that count (see
//! [`incremental`]).
//!
//! # Failure model
//!
//! Markers are an optimisation. Every method here logs store failures and
//! carries on: a failed read behaves as "no marker" (so the next pass does
//! full work) and a failed write returns `false`. Nothing is thrown.
//!
//! Monotonicity is the caller's contract. Writing a lower count than the
//! stored one is accepted and logged.

pub mod incremental;

use crate::config::{SleeveEngineConfig, Verbosity};
use crate::metrics;
use crate::model::now_millis;
use crate::storage::rows;
use crate::storage::sql::SqlStore;
use sqlx::Row;
use tracing::{debug, info, warn};

pub use incremental::{new_since_marker, IncrementalScanner};

/// Stored state of one category.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Marker {
    pub last_count: usize,
    pub sample: Option<Vec<i64>>,
}

#[derive(Clone)]
pub struct MarkerStore {
    store: SqlStore,
    verbosity: Verbosity,
}

impl MarkerStore {
    #[must_use]
    pub fn new(store: SqlStore, config: &SleeveEngineConfig) -> Self {
        Self { store, verbosity: config.verbosity }
    }

    /// Marker for `category`, or `(0, None)` if none is stored or the read fails.
    pub async fn get_marker(&self, category: &str) -> Marker {
        let row = sqlx::query(
            "SELECT last_processed_count, last_processed_ids_sample FROM category_processing_markers WHERE category = ?",
        )
        .bind(category)
        .fetch_optional(self.store.pool())
        .await;

        match row {
            Ok(Some(row)) => {
                let count = row.try_get::<i64, _>("last_processed_count").unwrap_or(0);
                let sample = rows::text(&row, "last_processed_ids_sample")
                    .filter(|raw| !raw.trim().is_empty())
                    .and_then(|raw| match serde_json::from_str::<Vec<i64>>(&raw) {
                        Ok(ids) => Some(ids),
                        Err(e) => {
                            warn!(category, error = %e, "Malformed marker sample, ignoring");
                            None
                        }
                    });
                Marker {
                    last_count: usize::try_from(count).unwrap_or(0),
                    sample,
                }
            }
            Ok(None) => Marker::default(),
            Err(e) => {
                warn!(category, error = %e, "Marker read failed, treating as unprocessed");
                Marker::default()
            }
        }
    }

    /// Store `new_count` for `category`. Returns `false` on failure.
    pub async fn update_marker(&self, category: &str, new_count: usize, sample_ids: &[i64]) -> bool {
        let previous = self.get_marker(category).await.last_count;
        if new_count < previous {
            warn!(category, previous, new_count, "Marker moving backwards");
        }

        let sample = if sample_ids.is_empty() {
            None
        } else {
            Some(rows::to_json(&sample_ids))
        };
        let now = now_millis();
        let sql = if self.store.is_sqlite() {
            "INSERT INTO category_processing_markers \
             (category, last_processed_count, last_processed_ids_sample, marked_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(category) DO UPDATE SET \
             last_processed_count = excluded.last_processed_count, \
             last_processed_ids_sample = excluded.last_processed_ids_sample, \
             marked_at = excluded.marked_at, updated_at = excluded.updated_at"
        } else {
            "INSERT INTO category_processing_markers \
             (category, last_processed_count, last_processed_ids_sample, marked_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
             last_processed_count = VALUES(last_processed_count), \
             last_processed_ids_sample = VALUES(last_processed_ids_sample), \
             marked_at = VALUES(marked_at), updated_at = VALUES(updated_at)"
        };

        let result = sqlx::query(sql)
            .bind(category)
            .bind(i64::try_from(new_count).unwrap_or(i64::MAX))
            .bind(sample)
            .bind(now)
            .bind(now)
            .execute(self.store.pool())
            .await;

        match result {
            Ok(_) => {
                metrics::record_marker_advance(true);
                if self.verbosity.summaries() {
                    debug!(category, new_count, "Marker updated");
                }
                true
            }
            Err(e) => {
                metrics::record_marker_advance(false);
                warn!(category, new_count, error = %e, "Marker update failed");
                false
            }
        }
    }

    pub async fn reset_marker(&self, category: &str) -> bool {
        self.delete("category = ?", Some(category.to_string()), "reset_marker").await
    }

    pub async fn reset_all_markers(&self) -> bool {
        self.delete("1 = 1", None, "reset_all_markers").await
    }

    /// Reset every marker whose category ends with `level_suffix`
    /// (e.g. `"_L2"` for all second-level markers). The match is exact and
    /// case-sensitive; an empty suffix matches nothing.
    pub async fn reset_markers_for_level(&self, level_suffix: &str) -> bool {
        if level_suffix.is_empty() {
            warn!("Empty level suffix, no markers reset");
            return false;
        }
        let found = match sqlx::query("SELECT category FROM category_processing_markers")
            .fetch_all(self.store.pool())
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(level_suffix, error = %e, "Marker listing failed");
                return false;
            }
        };

        let mut ok = true;
        for category in found
            .iter()
            .filter_map(|row| rows::text(row, "category"))
            .filter(|category| category.ends_with(level_suffix))
        {
            ok &= self.delete("category = ?", Some(category), "reset_markers_for_level").await;
        }
        ok
    }

    async fn delete(&self, filter: &str, bind: Option<String>, operation: &str) -> bool {
        let sql = format!("DELETE FROM category_processing_markers WHERE {}", filter);
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind.as_deref() {
            query = query.bind(value);
        }
        match query.execute(self.store.pool()).await {
            Ok(result) => {
                if self.verbosity.summaries() {
                    info!(operation, removed = result.rows_affected(), "Markers reset");
                }
                true
            }
            Err(e) => {
                warn!(operation, error = %e, "Marker reset failed");
                false
            }
        }
    }
}
