use crate::identity::ConstituentKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Parameter name → formatted value.
pub type ParameterMap = BTreeMap<String, String>;

/// Point-in-time capture of parameter values feeding one sleeve.
///
/// Exactly one of the owner ids is normally set. A combined sleeve's
/// snapshot may instead carry only `constituent_refs`, pointing at the
/// individual and cluster snapshots it was assembled from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SleeveSnapshotView {
    /// Row id, `None` until persisted
    pub snapshot_id: Option<i64>,
    pub sleeve_instance_id: Option<i64>,
    pub cluster_instance_id: Option<i64>,
    pub combined_instance_id: Option<i64>,
    pub clash_zone_guid: Option<Uuid>,
    pub mep_parameters: ParameterMap,
    pub host_parameters: ParameterMap,
    pub source_doc_keys: Vec<String>,
    pub mep_element_ids: Vec<i64>,
    pub host_element_ids: Vec<i64>,
    /// Canonical constituent keys (`I:<guid>`, `C:<instance>`)
    pub constituent_refs: Vec<String>,
    pub captured_at: i64,
}

impl SleeveSnapshotView {
    #[must_use]
    pub fn for_sleeve(sleeve_instance_id: i64, clash_zone_guid: Uuid) -> Self {
        Self {
            sleeve_instance_id: Some(sleeve_instance_id),
            clash_zone_guid: Some(clash_zone_guid),
            captured_at: super::now_millis(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn for_cluster(cluster_instance_id: i64) -> Self {
        Self {
            cluster_instance_id: Some(cluster_instance_id),
            captured_at: super::now_millis(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn for_combined(combined_instance_id: i64, constituents: &[ConstituentKey]) -> Self {
        Self {
            combined_instance_id: Some(combined_instance_id),
            constituent_refs: constituents.iter().map(ConstituentKey::canonical).collect(),
            captured_at: super::now_millis(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_mep_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.mep_parameters.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_host_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.host_parameters.insert(name.into(), value.into());
        self
    }

    /// Constituent refs that parse; malformed entries are skipped.
    #[must_use]
    pub fn constituent_keys(&self) -> Vec<ConstituentKey> {
        self.constituent_refs
            .iter()
            .filter_map(|r| r.parse().ok())
            .collect()
    }
}
