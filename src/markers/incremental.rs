//! Incremental filtering against a category marker.
//!
//! Host element ids of a category are assumed to arrive in a stable order
//! across passes, with new elements appended. The marker count is then the
//! length of the prefix already handled:
//!
//! ```text
//! last_count == 0        → everything
//! len(ids) <= last_count → nothing
//! otherwise              → ids[last_count..]
//! ```

use super::MarkerStore;
use tracing::{debug, warn};

/// The part of `ids` beyond `last_count`.
///
/// ```
/// use sleeve_engine::markers::new_since_marker;
///
/// let ids: Vec<i64> = (1..=15).collect();
/// assert_eq!(new_since_marker(&ids, 10), vec![11, 12, 13, 14, 15]);
/// assert_eq!(new_since_marker(&ids[..10], 10), Vec::<i64>::new());
/// assert_eq!(new_since_marker(&ids[..3], 0), vec![1, 2, 3]);
/// ```
#[must_use]
pub fn new_since_marker<T: Clone>(ids: &[T], last_count: usize) -> Vec<T> {
    if last_count == 0 {
        return ids.to_vec();
    }
    if ids.len() <= last_count {
        return Vec::new();
    }
    ids[last_count..].to_vec()
}

/// Marker-backed filter for one processing pass.
#[derive(Clone)]
pub struct IncrementalScanner {
    markers: MarkerStore,
    sample_size: usize,
}

impl IncrementalScanner {
    #[must_use]
    pub fn new(markers: MarkerStore, sample_size: usize) -> Self {
        Self { markers, sample_size }
    }

    #[must_use]
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Ids of `category` not yet covered by its marker.
    pub async fn new_sleeves_only(&self, ids: &[i64], category: &str) -> Vec<i64> {
        let marker = self.markers.get_marker(category).await;
        let fresh = new_since_marker(ids, marker.last_count);
        debug!(category, total = ids.len(), last_count = marker.last_count, fresh = fresh.len(), "Incremental filter");
        fresh
    }

    /// Advance the marker to cover every id in `processed_ids`.
    ///
    /// `processed_ids` is the category's full id list as passed to
    /// [`new_sleeves_only`](Self::new_sleeves_only), not just the fresh
    /// suffix: its length becomes the new count. A shorter list than the
    /// stored count is refused, so a caller passing only the fresh ids
    /// cannot move the marker backwards. Use
    /// [`MarkerStore::update_marker`] to lower a marker on purpose.
    ///
    /// Call only after the pass's batch has committed. Keeps the last
    /// `sample_size` ids as the diagnostic sample.
    pub async fn mark_category_processed(&self, category: &str, processed_ids: &[i64]) -> bool {
        let previous = self.markers.get_marker(category).await.last_count;
        if processed_ids.len() < previous {
            warn!(
                category,
                previous,
                given = processed_ids.len(),
                "Processed ids shorter than the marker, expected the full id list"
            );
            return false;
        }
        let start = processed_ids.len().saturating_sub(self.sample_size);
        self.markers
            .update_marker(category, processed_ids.len(), &processed_ids[start..])
            .await
    }
}
