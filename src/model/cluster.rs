use super::clash_zone::UNASSIGNED;
use super::geometry::SleeveGeometry;
use crate::identity::cluster_identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// The slice of the model a cluster belongs to. Batch saves replace every
/// row of a scope at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub combo_id: i64,
    pub filter_id: i64,
    pub category: String,
}

impl ScopeKey {
    #[must_use]
    pub fn new(combo_id: i64, filter_id: i64, category: impl Into<String>) -> Self {
        Self { combo_id, filter_id, category: category.into() }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.combo_id, self.filter_id, self.category)
    }
}

/// A group of clash zones of one category resolved by one opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSleeve {
    /// Row id, `None` until persisted
    pub id: Option<i64>,
    /// Host instance id, [`UNASSIGNED`] until placed
    pub instance_id: i64,
    /// Content GUID of the constituent set, `None` for an empty set
    pub content_guid: Option<Uuid>,
    pub scope: ScopeKey,
    pub geometry: SleeveGeometry,
    /// Constituent clash zone GUIDs, sorted and unique once normalized
    pub constituents: Vec<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClusterSleeve {
    #[must_use]
    pub fn new(scope: ScopeKey, constituents: Vec<Uuid>) -> Self {
        let now = super::now_millis();
        let mut cluster = Self {
            id: None,
            instance_id: UNASSIGNED,
            content_guid: None,
            scope,
            geometry: SleeveGeometry::default(),
            constituents,
            created_at: now,
            updated_at: now,
        };
        cluster.normalize();
        cluster
    }

    #[must_use]
    pub fn with_instance_id(mut self, instance_id: i64) -> Self {
        self.instance_id = instance_id;
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: SleeveGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Sort and dedupe constituents, then recompute the content GUID.
    ///
    /// Returns how many duplicate entries were dropped.
    pub fn normalize(&mut self) -> usize {
        let before = self.constituents.len();
        let unique: BTreeSet<Uuid> = self.constituents.drain(..).collect();
        self.constituents = unique.into_iter().collect();
        self.content_guid = cluster_identity(&self.constituents);
        before - self.constituents.len()
    }

    /// Whether the host has placed this cluster.
    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.instance_id > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Pipes"), vec![a, b, a]);
        assert_eq!(cluster.constituents, vec![b, a]);
        assert_eq!(cluster.content_guid, cluster_identity(&[a, b]));
        assert!(!cluster.is_placed());
    }

    #[test]
    fn test_empty_cluster_has_no_guid() {
        let cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Pipes"), vec![]);
        assert!(cluster.content_guid.is_none());
    }

    #[test]
    fn test_normalize_reports_duplicates() {
        let a = Uuid::from_u128(5);
        let mut cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Ducts"), vec![]);
        cluster.constituents = vec![a, a, a];
        assert_eq!(cluster.normalize(), 2);
        assert_eq!(cluster.constituents.len(), 1);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(ScopeKey::new(3, 7, "Pipes").to_string(), "3/7/Pipes");
    }
}
