use super::clash_zone::UNASSIGNED;
use super::geometry::SleeveGeometry;
use crate::identity::{combined_identity, ClusterRef, ConstituentKey, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Scope of a combined sleeve. Combined sleeves span categories, so only
/// combo and filter partition them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombinedScope {
    pub combo_id: i64,
    pub filter_id: i64,
}

impl CombinedScope {
    #[must_use]
    pub fn new(combo_id: i64, filter_id: i64) -> Self {
        Self { combo_id, filter_id }
    }
}

impl fmt::Display for CombinedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.combo_id, self.filter_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstituentType {
    Individual,
    Cluster,
}

impl ConstituentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "Individual",
            Self::Cluster => "Cluster",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Individual" | "individual" | "I" => Some(Self::Individual),
            "Cluster" | "cluster" | "C" => Some(Self::Cluster),
            _ => None,
        }
    }
}

/// A member of a combined sleeve as supplied by the grouping step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedConstituent {
    pub key: ConstituentKey,
    pub category: String,
}

impl CombinedConstituent {
    #[must_use]
    pub fn individual(guid: Uuid, category: impl Into<String>) -> Self {
        Self { key: ConstituentKey::Individual(guid), category: category.into() }
    }

    #[must_use]
    pub fn cluster(cluster: ClusterRef, category: impl Into<String>) -> Self {
        Self { key: ConstituentKey::Cluster(cluster), category: category.into() }
    }

    #[must_use]
    pub fn constituent_type(&self) -> ConstituentType {
        match self.key {
            ConstituentKey::Individual(_) => ConstituentType::Individual,
            ConstituentKey::Cluster(_) => ConstituentType::Cluster,
        }
    }
}

/// A persisted child row of a combined sleeve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleeveConstituent {
    pub id: i64,
    pub combined_sleeve_id: i64,
    pub constituent: CombinedConstituent,
}

impl SleeveConstituent {
    #[must_use]
    pub fn clash_zone_guid(&self) -> Option<Uuid> {
        match self.constituent.key {
            ConstituentKey::Individual(guid) => Some(guid),
            ConstituentKey::Cluster(_) => None,
        }
    }

    #[must_use]
    pub fn cluster_instance_id(&self) -> Option<i64> {
        match self.constituent.key {
            ConstituentKey::Cluster(ClusterRef::Instance(id)) => Some(id),
            _ => None,
        }
    }
}

/// A cross-category opening covering zones and/or clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSleeve {
    /// Row id, `None` until persisted
    pub id: Option<i64>,
    /// Host instance id, [`UNASSIGNED`] until placed
    pub instance_id: i64,
    pub content_hash: Option<ContentHash>,
    pub scope: CombinedScope,
    /// Categories in first-seen order
    pub categories: Vec<String>,
    pub geometry: SleeveGeometry,
    pub constituents: Vec<CombinedConstituent>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CombinedSleeve {
    #[must_use]
    pub fn new(scope: CombinedScope, constituents: Vec<CombinedConstituent>) -> Self {
        let now = super::now_millis();
        let mut combined = Self {
            id: None,
            instance_id: UNASSIGNED,
            content_hash: None,
            scope,
            categories: Vec::new(),
            geometry: SleeveGeometry::default(),
            constituents,
            created_at: now,
            updated_at: now,
        };
        combined.normalize();
        combined
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

    /// Drop repeated constituent keys (first occurrence wins), rebuild the
    /// category list from what remains, recompute the content hash.
    ///
    /// Returns how many duplicate entries were dropped.
    pub fn normalize(&mut self) -> usize {
        let before = self.constituents.len();
        let mut seen = HashSet::new();
        self.constituents.retain(|c| seen.insert(c.key));

        let mut categories: Vec<String> = Vec::new();
        for category in self.categories.iter().chain(self.constituents.iter().map(|c| &c.category)) {
            if !category.is_empty() && !categories.contains(category) {
                categories.push(category.clone());
            }
        }
        self.categories = categories;
        self.content_hash = combined_identity(self.constituents.iter().map(|c| &c.key));
        before - self.constituents.len()
    }

    #[must_use]
    pub fn is_placed(&self) -> bool {
        self.instance_id > 0
    }

    /// True if any constituent key depends on a row id.
    #[must_use]
    pub fn has_unstable_identity(&self) -> bool {
        self.constituents.iter().any(|c| c.key.is_unstable())
    }

    /// Categories as persisted (comma separated).
    #[must_use]
    pub fn categories_csv(&self) -> String {
        self.categories.join(",")
    }

    #[must_use]
    pub fn parse_categories(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_normalize_dedupes_and_orders_categories() {
        let combined = CombinedSleeve::new(
            CombinedScope::new(1, 2),
            vec![
                CombinedConstituent::individual(g(1), "Pipes"),
                CombinedConstituent::cluster(ClusterRef::Instance(900), "Ducts"),
                CombinedConstituent::individual(g(1), "Pipes"),
                CombinedConstituent::individual(g(2), "Pipes"),
            ],
        );
        assert_eq!(combined.constituents.len(), 3);
        assert_eq!(combined.categories, vec!["Pipes".to_string(), "Ducts".to_string()]);
        assert!(combined.content_hash.is_some());
    }

    #[test]
    fn test_duplicate_input_same_identity() {
        let once = CombinedSleeve::new(
            CombinedScope::new(1, 2),
            vec![CombinedConstituent::individual(g(1), "Pipes")],
        );
        let twice = CombinedSleeve::new(
            CombinedScope::new(1, 2),
            vec![
                CombinedConstituent::individual(g(1), "Pipes"),
                CombinedConstituent::individual(g(1), "Pipes"),
            ],
        );
        assert_eq!(once.content_hash, twice.content_hash);
        assert_eq!(once.constituents.len(), twice.constituents.len());
    }

    #[test]
    fn test_unstable_identity_flag() {
        let combined = CombinedSleeve::new(
            CombinedScope::new(1, 1),
            vec![CombinedConstituent::cluster(ClusterRef::Row(4), "Ducts")],
        );
        assert!(combined.has_unstable_identity());
    }

    #[test]
    fn test_categories_csv_roundtrip() {
        let parsed = CombinedSleeve::parse_categories("Pipes, Ducts,,Cable Trays");
        assert_eq!(parsed, vec!["Pipes", "Ducts", "Cable Trays"]);
    }

    #[test]
    fn test_constituent_type_parse() {
        assert_eq!(ConstituentType::parse("Cluster"), Some(ConstituentType::Cluster));
        assert_eq!(ConstituentType::parse("I"), Some(ConstituentType::Individual));
        assert_eq!(ConstituentType::parse("?"), None);
    }
}
