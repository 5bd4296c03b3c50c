//! Read-only snapshot lookup, built once per session.
//!
//! The index holds every persisted snapshot behind an `Arc` and maps owner
//! ids and clash zone GUIDs onto them. It is never mutated after
//! [`SnapshotIndex::build`]; a new session builds a new index.

use crate::identity::{ClusterRef, ConstituentKey};
use crate::metrics;
use crate::model::SleeveSnapshotView;
use crate::storage::records::RecordStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct SnapshotIndex {
    by_sleeve: HashMap<i64, Arc<SleeveSnapshotView>>,
    by_cluster: HashMap<i64, Arc<SleeveSnapshotView>>,
    by_combined: HashMap<i64, Arc<SleeveSnapshotView>>,
    by_guid: HashMap<Uuid, Arc<SleeveSnapshotView>>,
    len: usize,
}

/// What a combined sleeve resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedSnapshot {
    /// A snapshot captured for the combined sleeve itself
    Own(Arc<SleeveSnapshotView>),
    /// No own snapshot; the snapshots of its constituents that were found
    Constituents(Vec<Arc<SleeveSnapshotView>>),
}

impl SnapshotIndex {
    /// Load every snapshot and index it. A failed load yields an empty index.
    pub async fn build(records: &RecordStore) -> Self {
        let index = Self::from_views(records.load_snapshots().await);
        info!(
            snapshots = index.len,
            sleeves = index.by_sleeve.len(),
            clusters = index.by_cluster.len(),
            combined = index.by_combined.len(),
            "Snapshot index built"
        );
        index
    }

    /// Index already-loaded views. On duplicate keys the first view wins.
    #[must_use]
    pub fn from_views(views: Vec<SleeveSnapshotView>) -> Self {
        let mut index = Self::default();
        for view in views {
            let view = Arc::new(view);
            index.len += 1;
            if let Some(id) = view.sleeve_instance_id.filter(|id| *id > 0) {
                index.by_sleeve.entry(id).or_insert_with(|| Arc::clone(&view));
            }
            if let Some(id) = view.cluster_instance_id.filter(|id| *id > 0) {
                index.by_cluster.entry(id).or_insert_with(|| Arc::clone(&view));
            }
            if let Some(id) = view.combined_instance_id.filter(|id| *id > 0) {
                index.by_combined.entry(id).or_insert_with(|| Arc::clone(&view));
            }
            if let Some(guid) = view.clash_zone_guid {
                index.by_guid.entry(guid).or_insert_with(|| Arc::clone(&view));
            }
        }
        metrics::set_snapshot_index_entries(index.len);
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn for_sleeve(&self, sleeve_instance_id: i64) -> Option<Arc<SleeveSnapshotView>> {
        self.by_sleeve.get(&sleeve_instance_id).cloned()
    }

    #[must_use]
    pub fn for_cluster(&self, cluster_instance_id: i64) -> Option<Arc<SleeveSnapshotView>> {
        self.by_cluster.get(&cluster_instance_id).cloned()
    }

    #[must_use]
    pub fn for_clash_zone(&self, guid: &Uuid) -> Option<Arc<SleeveSnapshotView>> {
        self.by_guid.get(guid).cloned()
    }

    /// Resolve a constituent reference to the snapshot it points at.
    #[must_use]
    pub fn for_constituent(&self, key: &ConstituentKey) -> Option<Arc<SleeveSnapshotView>> {
        match key {
            ConstituentKey::Individual(guid) => self.for_clash_zone(guid),
            ConstituentKey::Cluster(ClusterRef::Instance(id)) => self.for_cluster(*id),
            // Row ids are not recorded on snapshots.
            ConstituentKey::Cluster(ClusterRef::Row(_)) => None,
        }
    }

    /// A combined sleeve's own snapshot, or failing that, the snapshots of
    /// the constituents listed in any snapshot referencing it.
    ///
    /// `constituents` is used when the combined sleeve has no snapshot at all.
    #[must_use]
    pub fn for_combined(&self, combined_instance_id: i64, constituents: &[ConstituentKey]) -> Option<CombinedSnapshot> {
        if let Some(own) = self.by_combined.get(&combined_instance_id) {
            if own.constituent_refs.is_empty() || !own.mep_parameters.is_empty() || !own.host_parameters.is_empty() {
                return Some(CombinedSnapshot::Own(Arc::clone(own)));
            }
            return self.resolve_refs(&own.constituent_keys());
        }
        self.resolve_refs(constituents)
    }

    fn resolve_refs(&self, keys: &[ConstituentKey]) -> Option<CombinedSnapshot> {
        let found: Vec<_> = keys.iter().filter_map(|k| self.for_constituent(k)).collect();
        if found.len() < keys.len() {
            debug!(requested = keys.len(), found = found.len(), "Some constituent snapshots missing");
        }
        (!found.is_empty()).then_some(CombinedSnapshot::Constituents(found))
    }
}
